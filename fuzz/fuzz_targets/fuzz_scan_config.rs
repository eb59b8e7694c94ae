#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing, validation and request building must reject bad input without panicking.
    let Ok(cfg) = qscan_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    let _ = qscan_core::ScanRequest::try_from(&cfg.scan);
});
