use crate::PortError;

/// Receives one row per measurement: positions first, then scaler counts.
pub trait DataSink {
    fn append_row(&mut self, positions: &[f64], counts: &[i64]) -> Result<(), PortError>;

    /// Row for a live plot, which may use a different X axis than the
    /// datafile. Ignored by default.
    fn append_plot_row(&mut self, _positions: &[f64], _counts: &[i64]) -> Result<(), PortError> {
        Ok(())
    }

    /// Called once after the last row.
    fn finish(&mut self) -> Result<(), PortError> {
        Ok(())
    }
}

/// In-memory sink, handy for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    pub rows: Vec<(Vec<f64>, Vec<i64>)>,
    pub plot_rows: Vec<(Vec<f64>, Vec<i64>)>,
    pub finished: bool,
}

impl DataSink for VecSink {
    fn append_row(&mut self, positions: &[f64], counts: &[i64]) -> Result<(), PortError> {
        self.rows.push((positions.to_vec(), counts.to_vec()));
        Ok(())
    }

    fn append_plot_row(&mut self, positions: &[f64], counts: &[i64]) -> Result<(), PortError> {
        self.plot_rows.push((positions.to_vec(), counts.to_vec()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PortError> {
        self.finished = true;
        Ok(())
    }
}
