//! Checks how often a pinner complains about an unreadable affinity mask.
//!
//! Installing a logger is process-wide, so this lives in its own test binary.

use {
    agave_thread_pinning::*,
    log::{Level, LevelFilter, Log, Metadata, Record},
    std::sync::{Arc, Mutex as StdMutex},
};

struct WarningRecorder {
    warnings: StdMutex<Vec<String>>,
}

impl Log for WarningRecorder {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn && metadata.target().starts_with("agave_thread_pinning")
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.warnings.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static RECORDER: WarningRecorder = WarningRecorder {
    warnings: StdMutex::new(Vec::new()),
};

#[test]
fn test_capture_failure_warns_once() {
    log::set_logger(&RECORDER).unwrap();
    log::set_max_level(LevelFilter::Warn);

    let pinner = Arc::new(
        PinningObserver::with_platform(&PinningConfig::default(), MockAffinity::failing_capture())
            .unwrap(),
    );
    let mut observers = ObserverSet::default();
    observers.push(pinner.clone());
    let runtime = RayonRuntime::with_observers(
        "warnOnce".to_string(),
        RayonConfig {
            worker_threads: 4,
            ..RayonConfig::default()
        },
        observers,
    )
    .unwrap();
    runtime.broadcast(|_| ());
    for slot in 0..8 {
        pinner.on_scheduler_entry(Some(slot));
        pinner.on_scheduler_exit(Some(slot));
    }
    drop(runtime);

    let warnings = RECORDER.warnings.lock().unwrap().clone();
    if cfg!(feature = "affinity") {
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].starts_with("Failed to obtain process affinity mask"));
        assert!(warnings[0].ends_with("Thread affinitization is disabled."));
    } else {
        assert!(warnings.is_empty(), "{warnings:?}");
    }
    assert!(pinner.platform().applied().is_empty());
}
