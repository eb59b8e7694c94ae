//! CSV datafile and plot-row writers.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use eyre::{Result, WrapErr};
use qscan_traits::{DataSink, PortError};

type Writer = csv::Writer<Box<dyn Write>>;

/// Open `path` for writing, or stdout for `-`.
pub fn open_writer(path: Option<&Path>) -> Result<Writer> {
    let out: Box<dyn Write> = match path {
        Some(p) if p != Path::new("-") => Box::new(
            File::create(p).wrap_err_with(|| format!("create output file {}", p.display()))?,
        ),
        _ => Box::new(io::stdout()),
    };
    Ok(csv::Writer::from_writer(out))
}

fn record(positions: &[f64], counts: &[i64]) -> Vec<String> {
    positions
        .iter()
        .map(|p| format!("{p:.6}"))
        .chain(counts.iter().map(ToString::to_string))
        .collect()
}

/// Writes one CSV row per sample: position columns, then one column per input.
pub struct CsvSink {
    data: Writer,
    plot: Option<Writer>,
    rows: usize,
}

impl CsvSink {
    pub fn new(data: Writer, plot: Option<Writer>) -> Self {
        Self {
            data,
            plot,
            rows: 0,
        }
    }

    /// Emit the column names ahead of the first row.
    pub fn write_headers(&mut self, data: &[String], plot: &[String]) -> Result<()> {
        self.data.write_record(data).wrap_err("write datafile header")?;
        if let Some(w) = &mut self.plot {
            w.write_record(plot).wrap_err("write plotfile header")?;
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl DataSink for CsvSink {
    fn append_row(&mut self, positions: &[f64], counts: &[i64]) -> Result<(), PortError> {
        self.data.write_record(record(positions, counts))?;
        self.rows += 1;
        Ok(())
    }

    fn append_plot_row(&mut self, positions: &[f64], counts: &[i64]) -> Result<(), PortError> {
        if let Some(w) = &mut self.plot {
            w.write_record(record(positions, counts))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PortError> {
        self.data.flush()?;
        if let Some(w) = &mut self.plot {
            w.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shared(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);
    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rows_follow_header_and_plot_is_optional() {
        let buf = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let w: Box<dyn Write> = Box::new(Shared(buf.clone()));
        let mut sink = CsvSink::new(csv::Writer::from_writer(w), None);
        sink.write_headers(&["theta".into(), "i0".into()], &[]).unwrap();
        sink.append_row(&[0.5], &[12]).unwrap();
        sink.append_plot_row(&[1.0], &[12]).unwrap();
        sink.finish().unwrap();
        let text = String::from_utf8(buf.borrow().clone()).unwrap();
        assert_eq!(text, "theta,i0\n0.500000,12\n");
        assert_eq!(sink.rows(), 1);
    }
}
