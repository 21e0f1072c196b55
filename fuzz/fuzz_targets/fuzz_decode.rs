#![no_main]
use libfuzzer_sys::{Corpus, fuzz_target};
use tensorfuzz::Status;
use tensorfuzz::ffi::run_named;

fuzz_target!(
    init: {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    },
    |data: &[u8]| -> Corpus {
        match run_named("decode", data) {
            Some(Status::Keep) => Corpus::Keep,
            _ => Corpus::Reject,
        }
    }
);
