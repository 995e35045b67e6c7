//! Fuzz target: persisted `AdmissionConfig` blob
//!
//! Feeds arbitrary bytes to the NVS config store as if they had been read
//! back from flash and verifies:
//! - `load` never panics
//! - anything `load` accepts passes validation and can be saved again
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use bondgate::adapters::nvs::NvsConfigStore;
use bondgate::app::ports::ConfigPort;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(store) = NvsConfigStore::new() else {
        return;
    };
    store.sim_put_raw(data);

    if let Ok(cfg) = store.load() {
        assert!(cfg.validate().is_ok(), "load accepted an invalid config");
        assert!(store.save(&cfg).is_ok(), "loaded config failed to save");
    }
});
