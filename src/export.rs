//! Export driver.
//!
//! Writing assets out (fingerprinted files, compressed copies, manifests)
//! is left to [`Exporter`] implementations. The driver runs every exporter
//! over every asset: exporters of one asset run in order, while distinct
//! assets may run in parallel on a bounded rayon pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::asset::Asset;
use crate::config::ExportSettings;

/// One export step for an asset.
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this asset needs nothing from this exporter.
    fn skip(&self, _asset: &Asset) -> bool {
        false
    }

    fn call(&self, asset: &Asset) -> Result<()>;
}

/// Run `exporters` over `assets`.
///
/// Stops scheduling new assets after the first failure and returns that
/// failure.
pub fn export_all(
    assets: &[Arc<Asset>],
    exporters: &[Arc<dyn Exporter>],
    settings: &ExportSettings,
) -> Result<()> {
    if !settings.concurrent || assets.len() < 2 {
        for asset in assets {
            export_one(asset, exporters)?;
        }
        return Ok(());
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(workers) = settings.workers {
        builder = builder.num_threads(workers);
    }
    let pool = builder
        .build()
        .context("failed to create export thread pool")?;

    let failed = AtomicBool::new(false);
    let first_error = Mutex::new(None);
    pool.install(|| {
        assets.par_iter().for_each(|asset| {
            if failed.load(Ordering::Relaxed) {
                return;
            }
            if let Err(err) = export_one(asset, exporters) {
                let mut slot = first_error.lock();
                if slot.is_none() {
                    log!("error"; "{:#}", err);
                    *slot = Some(err);
                }
                failed.store(true, Ordering::Relaxed);
            }
        });
    });

    match first_error.into_inner() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn export_one(asset: &Asset, exporters: &[Arc<dyn Exporter>]) -> Result<()> {
    for exporter in exporters {
        if exporter.skip(asset) {
            debug!("export"; "{} skips {}", exporter.name(), asset.logical_path);
            continue;
        }
        exporter
            .call(asset)
            .with_context(|| format!("{} failed on {}", exporter.name(), asset.logical_path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Metadata;
    use crate::digest::ContentHash;
    use crate::uri::AssetUri;
    use std::path::PathBuf;

    fn asset(logical_path: &str) -> Arc<Asset> {
        let filename = PathBuf::from("/srv/assets").join(logical_path);
        Arc::new(Asset {
            uri: AssetUri::new(&filename).with_id("id"),
            load_path: PathBuf::from("/srv/assets"),
            filename,
            name: logical_path.to_string(),
            logical_path: logical_path.to_string(),
            content_type: "text/plain".into(),
            source: logical_path.as_bytes().to_vec(),
            digest: ContentHash::of_bytes(logical_path.as_bytes()),
            dependencies_digest: ContentHash::of_bytes(b""),
            metadata: Metadata::default(),
        })
    }

    /// Records `name:logical_path` for every call.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
        skip_on: Option<&'static str>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail_on: None,
                skip_on: None,
            }
        }
    }

    impl Exporter for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn skip(&self, asset: &Asset) -> bool {
            self.skip_on == Some(asset.logical_path.as_str())
        }

        fn call(&self, asset: &Asset) -> Result<()> {
            if self.fail_on == Some(asset.logical_path.as_str()) {
                anyhow::bail!("disk full");
            }
            self.log
                .lock()
                .push(format!("{}:{}", self.name, asset.logical_path));
            Ok(())
        }
    }

    fn serial() -> ExportSettings {
        ExportSettings {
            concurrent: false,
            workers: None,
        }
    }

    #[test]
    fn test_serial_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exporters: Vec<Arc<dyn Exporter>> = vec![
            Arc::new(Recorder::new("write", &log)),
            Arc::new(Recorder::new("gzip", &log)),
        ];
        export_all(&[asset("a.js"), asset("b.css")], &exporters, &serial()).unwrap();
        assert_eq!(
            *log.lock(),
            vec!["write:a.js", "gzip:a.js", "write:b.css", "gzip:b.css"]
        );
    }

    #[test]
    fn test_parallel_keeps_per_asset_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exporters: Vec<Arc<dyn Exporter>> = vec![
            Arc::new(Recorder::new("write", &log)),
            Arc::new(Recorder::new("gzip", &log)),
        ];
        let assets: Vec<_> = (0..16).map(|i| asset(&format!("{i}.js"))).collect();
        let settings = ExportSettings {
            concurrent: true,
            workers: Some(4),
        };
        export_all(&assets, &exporters, &settings).unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 32);
        for i in 0..16 {
            let write = log.iter().position(|e| *e == format!("write:{i}.js")).unwrap();
            let gzip = log.iter().position(|e| *e == format!("gzip:{i}.js")).unwrap();
            assert!(write < gzip);
        }
    }

    #[test]
    fn test_skip_and_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut gzip = Recorder::new("gzip", &log);
        gzip.skip_on = Some("logo.png");
        let mut write = Recorder::new("write", &log);
        write.fail_on = Some("b.js");
        let exporters: Vec<Arc<dyn Exporter>> = vec![Arc::new(write), Arc::new(gzip)];

        export_all(&[asset("logo.png")], &exporters, &serial()).unwrap();
        assert_eq!(*log.lock(), vec!["write:logo.png"]);

        let err = export_all(&[asset("b.js")], &exporters, &serial()).unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
        assert!(err.to_string().contains("write failed on b.js"));
    }
}
