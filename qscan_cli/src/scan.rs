//! The `run`, `plan` and `self-check` commands.

use std::path::PathBuf;

use eyre::{Result, WrapErr};
use qscan_config::{Config, ScanCfg};
use qscan_core::{
    AcquisitionPlan, EngineCfg, MotionProfile, QuickScan, ScanControl, ScanError, ScanReport,
    ScanRequest,
};
use serde_json::json;

use crate::bench::Bench;
use crate::sink::{CsvSink, open_writer};

/// Output overrides from the `run` command line.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub datafile: Option<PathBuf>,
    pub plotfile: Option<PathBuf>,
    pub no_header: bool,
}

fn bench_for(cfg: &Config) -> Result<Bench> {
    let Some(bench) = &cfg.bench else {
        return Err(eyre::Report::new(ScanError::Configuration(
            "no [bench] section; this binary only drives simulated devices".into(),
        )));
    };
    Bench::build(bench)
}

/// Position columns (alternates replace the axes when given), then inputs.
fn columns(scan: &ScanCfg, alternates: &[String]) -> Vec<String> {
    let positions: Vec<String> = if alternates.is_empty() {
        scan.axes.iter().map(|a| a.motor.clone()).collect()
    } else {
        alternates.to_vec()
    };
    positions
        .into_iter()
        .chain(scan.inputs.iter().map(|i| i.name.clone()))
        .collect()
}

pub fn run(cfg: &Config, args: &RunArgs, control: ScanControl, json: bool) -> Result<()> {
    let request = ScanRequest::try_from(&cfg.scan)?;
    let mut bench = bench_for(cfg)?;
    let mut engine = QuickScan::new(EngineCfg::from(cfg))
        .with_clock(bench.clock())
        .with_control(control);

    let datafile = args
        .datafile
        .clone()
        .or_else(|| cfg.output.datafile.as_ref().map(PathBuf::from));
    let plotfile = args
        .plotfile
        .clone()
        .or_else(|| cfg.output.plotfile.as_ref().map(PathBuf::from));
    let to_stdout = datafile.as_ref().is_none_or(|p| p.as_os_str() == "-");
    let plot = plotfile
        .as_deref()
        .map(|p| open_writer(Some(p)))
        .transpose()?;
    let mut sink = CsvSink::new(open_writer(datafile.as_deref())?, plot);
    if cfg.output.header && !args.no_header {
        sink.write_headers(
            &columns(&cfg.scan, &cfg.scan.alternate.datafile),
            &columns(&cfg.scan, &cfg.scan.alternate.plot),
        )?;
    }

    let mut devices = bench.devices(&cfg.scan)?;
    let report = engine
        .run(&request, &mut devices, &mut sink)
        .wrap_err_with(|| format!("quick scan failed after {} rows", sink.rows()))?;

    let summary = summarize(&report, json);
    if to_stdout {
        eprintln!("{summary}");
    } else {
        println!("{summary}");
    }
    Ok(())
}

fn summarize(report: &ScanReport, json: bool) -> String {
    if json {
        let sources: serde_json::Map<String, serde_json::Value> = report
            .sources
            .iter()
            .map(|(name, src)| (name.clone(), json!(src.to_string())))
            .collect();
        return json!({
            "samples": report.samples_written,
            "requested_num_measurements": report.plan.requested_num_measurements,
            "actual_num_measurements": report.plan.actual_num_measurements,
            "measurement_time": report.plan.measurement_time,
            "sources": sources,
        })
        .to_string();
    }
    let mut out = format!(
        "scan complete: {} samples written ({} requested, {} acquired)",
        report.samples_written,
        report.plan.requested_num_measurements,
        report.plan.actual_num_measurements
    );
    for (name, src) in &report.sources {
        out.push_str(&format!("\n  {name}: {src}"));
    }
    out
}

pub fn plan(cfg: &Config, json: bool) -> Result<()> {
    let request = ScanRequest::try_from(&cfg.scan)?;
    let mut bench = bench_for(cfg)?;
    let mut engine = QuickScan::new(EngineCfg::from(cfg)).with_clock(bench.clock());
    let mut devices = bench.devices(&cfg.scan)?;
    let (plan, profiles) = engine.plan_only(&request, &mut devices)?;
    if json {
        println!("{}", plan_json(&plan, &profiles));
    } else {
        println!("{}", plan_text(&plan, &profiles));
    }
    Ok(())
}

fn plan_json(plan: &AcquisitionPlan, profiles: &[MotionProfile]) -> serde_json::Value {
    let motors: Vec<_> = profiles
        .iter()
        .map(|p| {
            json!({
                "motor": p.motor,
                "start": p.start,
                "end": p.end,
                "extended_start": p.extended_start,
                "extended_end": p.extended_end,
                "acceleration_time": p.acceleration_time,
            })
        })
        .collect();
    json!({
        "measurement": plan.measurement.label(),
        "measurement_time": plan.measurement_time,
        "requested_num_measurements": plan.requested_num_measurements,
        "actual_num_measurements": plan.actual_num_measurements,
        "premove_measurements": plan.premove_measurements,
        "acceleration_measurements": plan.acceleration_measurements,
        "estimated_duration": plan.estimated_duration,
        "backlash_correction": plan.backlash_correction,
        "motors": motors,
    })
}

fn plan_text(plan: &AcquisitionPlan, profiles: &[MotionProfile]) -> String {
    let mut out = format!(
        "measurement: {}, {} s per bin\nsamples: {} requested, {} acquired ({} premove, {} acceleration)\nestimated duration: {:.3} s\nbacklash correction: {}",
        plan.measurement.label(),
        plan.measurement_time,
        plan.requested_num_measurements,
        plan.actual_num_measurements,
        plan.premove_measurements,
        plan.acceleration_measurements,
        plan.estimated_duration,
        if plan.backlash_correction { "yes" } else { "no" },
    );
    for p in profiles {
        out.push_str(&format!(
            "\n{}: {} -> {} (extended {:.6} -> {:.6})",
            p.motor, p.start, p.end, p.extended_start, p.extended_end
        ));
    }
    out
}

pub fn self_check(cfg: &Config, json: bool) -> Result<()> {
    let mut bench = bench_for(cfg)?;
    let summary = bench.self_check()?;
    if json {
        let motors: serde_json::Map<String, serde_json::Value> = summary
            .motors
            .iter()
            .map(|(name, pos)| (name.clone(), json!(pos)))
            .collect();
        println!(
            "{}",
            json!({
                "ok": true,
                "motors": motors,
                "scalers": summary.scalers,
                "encoders": summary.encoders,
                "pulse_generator": summary.pulse_generator,
            })
        );
    } else {
        println!(
            "self-check ok: {} motors, {} scalers, {} encoders{}",
            summary.motors.len(),
            summary.scalers,
            summary.encoders,
            if summary.pulse_generator { ", pulse generator" } else { "" }
        );
    }
    Ok(())
}
