//! Human-readable error descriptions and structured JSON error formatting.

use qscan_core::{BuildError, ScanError, classify};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.chain().find_map(|e| e.downcast_ref::<BuildError>()) {
        return format!(
            "What happened: The scan request was rejected ({be}).\nLikely causes: Missing or out-of-range values in [scan].\nHow to fix: Edit the config file, then rerun `qscan plan` to check it."
        );
    }

    if let Some(se) = classify(err) {
        return match se {
            ScanError::Configuration(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: A motor, MCS or input named in [scan] does not exist, or a value is out of range.\nHow to fix: Edit the config file, then rerun `qscan plan` to check it."
            ),
            ScanError::UnsupportedMeasurementKind(kind) => format!(
                "What happened: Quick scans cannot use {kind} measurements.\nLikely causes: scan.measurement is set to preset_count.\nHow to fix: Use preset_time or preset_pulse_period."
            ),
            ScanError::NoClockAvailable(kind) => format!(
                "What happened: Nothing can pace {kind} bins.\nLikely causes: No pulse generator (or timer MCS) is configured.\nHow to fix: Set bench.pulse_generator for pulse-period scans, or bench.timer for preset-time scans."
            ),
            ScanError::DeviceBusyConflict(msg) => format!(
                "What happened: A device refused a command because it is busy ({msg}).\nLikely causes: Another client is moving the motor or counting on the scaler.\nHow to fix: Wait for the other operation to finish, then rerun."
            ),
            ScanError::TimedOut(msg) => format!(
                "What happened: A device did not respond in time ({msg}).\nLikely causes: A stalled motor, an MCS that never started, or timeouts set too low.\nHow to fix: Check the hardware, then raise motion.move_timeout_ms or acquisition.completion_margin_ms."
            ),
            ScanError::Interrupted => "What happened: The scan was interrupted.\nLikely causes: Ctrl-C or an operator abort.\nHow to fix: Samples captured before the interrupt were written; start a new scan to continue.".to_string(),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable name of the error class, used as the JSON `reason`.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if err.chain().any(|e| e.downcast_ref::<BuildError>().is_some()) {
        return "InvalidRequest";
    }
    match classify(err) {
        Some(ScanError::Configuration(_)) => "Configuration",
        Some(ScanError::UnsupportedMeasurementKind(_)) => "UnsupportedMeasurementKind",
        Some(ScanError::NoClockAvailable(_)) => "NoClockAvailable",
        Some(ScanError::DeviceBusyConflict(_)) => "DeviceBusyConflict",
        Some(ScanError::TimedOut(_)) => "TimedOut",
        Some(ScanError::Interrupted) => "Interrupted",
        Some(ScanError::PauseRequested) => "PauseRequested",
        Some(ScanError::HardwareReadback(_)) => "HardwareReadback",
        Some(ScanError::Hardware(_)) => "Hardware",
        Some(ScanError::Fatal(_)) => "Fatal",
        None => "Error",
    }
}

/// Stable exit codes per error class; unclassified errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Interrupted" => 2,
        "TimedOut" => 3,
        "InvalidRequest" | "Configuration" | "UnsupportedMeasurementKind" | "NoClockAvailable" => 4,
        "DeviceBusyConflict" => 5,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "reason": reason_name(err),
        "message": humanize(err),
        "error": format!("{err:#}"),
    })
    .to_string()
}
