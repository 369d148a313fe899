//! Binding execution (spec §4.6): binds a compiled circuit to a wave's
//! termination predicate and repeatedly steps it, accumulating a run
//! record, until the wave fires, the source exhausts, a cooperative
//! cancel flag is set, or a wallclock/step budget is exhausted.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tsi_dataset::DataLoader;
use tsi_types::error::CoreError;
use tsi_types::hash::content_hash_hex;

use crate::circuit::{Circuit, ContractSpec};
use crate::scheduler::Scheduler;

/// The JSON body of a wave file (spec §4.4's `waves: (id, file)` table).
/// `max_steps` is the termination predicate; `None` means "run until the
/// source is exhausted."
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WaveSpec {
    pub max_steps: Option<u64>,
}

impl WaveSpec {
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, String), CoreError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|_| CoreError::IoMissing(path.display().to_string()))?;
        let spec: Self = serde_json::from_slice(&bytes).map_err(|e| CoreError::IoCorrupt(format!("{}: {e}", path.display())))?;
        Ok((spec, content_hash_hex(&bytes)))
    }
}

/// A cooperative cancel flag, checked between steps (spec §4.6: "mid-step
/// cancellation is not supported"). Cloning shares the same underlying
/// flag, so a caller can cancel a binding from another thread.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-binding wallclock/step ceilings (spec §4.6: "Bindings carry an
/// optional wallclock budget and an optional max-steps budget; whichever
/// fires first terminates the run").
#[derive(Clone, Copy, Default)]
pub struct Budget {
    pub max_wallclock: Option<Duration>,
    pub max_steps: Option<u64>,
}

/// How a binding run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    WaveComplete,
    SourceExhausted,
    Cancelled,
    BudgetExhausted,
}

/// Accumulated per-contract step counts and aggregate loss statistics
/// (spec §4.6), plus the contract/wave content hashes (spec end-to-end
/// scenario 5).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub contract_hash: String,
    pub wave_hash: String,
    pub total_steps: u64,
    pub loss_sum: f64,
    pub loss_count: u64,
    pub termination: Termination,
}

impl RunRecord {
    pub fn mean_loss(&self) -> Option<f64> {
        if self.loss_count == 0 {
            None
        } else {
            Some(self.loss_sum / self.loss_count as f64)
        }
    }
}

/// Loads a contract + wave, compiles the circuit, and runs one binding to
/// completion (spec §4.6's "binding execution"). `dataloader` must be the
/// one named by the contract's `dataloader_init_id` — resolving that id is
/// the caller's responsibility, matching spec.md's config-space lookups
/// elsewhere in the pipeline.
pub fn run_binding(
    contract_path: impl AsRef<Path>,
    wave_path: impl AsRef<Path>,
    dataloader: Arc<DataLoader>,
    cancel: &CancelToken,
    budget: Budget,
) -> Result<RunRecord, CoreError> {
    let (contract_spec, contract_hash) = ContractSpec::load(contract_path)?;
    let (wave_spec, wave_hash) = WaveSpec::load(wave_path)?;
    let circuit = Circuit::compile(&contract_spec)?;
    let mut scheduler = Scheduler::new(circuit, dataloader)?;

    let started_at = Instant::now();
    let mut total_steps = 0u64;
    let mut loss_sum = 0.0f64;
    let mut loss_count = 0u64;

    let termination = loop {
        if cancel.is_cancelled() {
            break Termination::Cancelled;
        }
        if let Some(max_wallclock) = budget.max_wallclock {
            if started_at.elapsed() >= max_wallclock {
                break Termination::BudgetExhausted;
            }
        }
        if let Some(max_steps) = budget.max_steps {
            if total_steps >= max_steps {
                break Termination::BudgetExhausted;
            }
        }
        if let Some(wave_max_steps) = wave_spec.max_steps {
            if total_steps >= wave_max_steps {
                break Termination::WaveComplete;
            }
        }

        let step = scheduler.step()?;
        if step.exhausted {
            break Termination::SourceExhausted;
        }
        total_steps += 1;
        if let Some(loss) = step.loss {
            loss_sum += loss as f64;
            loss_count += 1;
        }
    };

    // Cancellation and budget exhaustion still return a run record with
    // partial step counts (spec §4.6) rather than an `Err`; `CoreError`'s
    // `Cancelled`/`BudgetExhausted` variants exist for call sites that have
    // no partial result to attach them to, which a binding always does.
    Ok(RunRecord {
        contract_hash,
        wave_hash,
        total_steps,
        loss_sum,
        loss_count,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::builtins::register_null_sink;
    use std::io::Write;
    use tsi_dataset::sampler::SequentialSampler;
    use tsi_dataset::{binarize_csv, Channel, ConcatDataset, DataLoaderOptions};

    fn write_json(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(body.as_bytes()).unwrap();
        path
    }

    fn build_loader(dir: &std::path::Path, rows: usize) -> Arc<DataLoader> {
        let csv_path = dir.join("c.csv");
        let mut body = String::from("timestamp,open\n");
        for i in 0..rows {
            body.push_str(&format!("{},{}\n", 1000 + i as i64 * 1000, i as f64));
        }
        std::fs::File::create(&csv_path).unwrap().write_all(body.as_bytes()).unwrap();
        let raw = dir.join("c.bin");
        let norm = dir.join("c.norm.bin");
        let sidecar = dir.join("c.schema.json");
        let schema = binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        let channel = Channel::open("kline", 1, 0, 1.0, &raw, &norm, schema).unwrap();
        let dataset = Arc::new(ConcatDataset::new(vec![channel]).unwrap());
        let opts = DataLoaderOptions { batch_size: 1, workers: 1, drop_last: false, queue_capacity: 2, timeout: Duration::from_secs(5) };
        Arc::new(DataLoader::new(dataset, Box::new(SequentialSampler), opts).unwrap())
    }

    #[test]
    fn single_step_binding_produces_a_non_empty_run_record() {
        register_null_sink();
        let dir = tempfile::tempdir().unwrap();
        let loader = build_loader(dir.path(), 1);
        let contract = write_json(
            dir.path(),
            "contract.json",
            r#"{"nodes":[{"id":"src","canonical_type":"tsi.source.dataloader"},{"id":"sink","canonical_type":"tsi.sink.null"}],
                "edges":[{"src":"src","src_port":"payload","dst":"sink","dst_port":"step"}],
                "source_node":"src","dataloader_init_id":"main"}"#,
        );
        let wave = write_json(dir.path(), "wave.json", r#"{"max_steps":1}"#);

        let record = run_binding(&contract, &wave, loader, &CancelToken::new(), Budget::default()).unwrap();
        assert_eq!(record.total_steps, 1);
        assert!(!record.contract_hash.is_empty());
        assert!(!record.wave_hash.is_empty());
        assert_eq!(record.termination, Termination::WaveComplete);
    }

    #[test]
    fn cancellation_is_observed_between_steps() {
        register_null_sink();
        let dir = tempfile::tempdir().unwrap();
        let loader = build_loader(dir.path(), 10);
        let contract = write_json(
            dir.path(),
            "contract.json",
            r#"{"nodes":[{"id":"src","canonical_type":"tsi.source.dataloader"},{"id":"sink","canonical_type":"tsi.sink.null"}],
                "edges":[{"src":"src","src_port":"payload","dst":"sink","dst_port":"step"}],
                "source_node":"src","dataloader_init_id":"main"}"#,
        );
        let wave = write_json(dir.path(), "wave.json", r#"{}"#);
        let cancel = CancelToken::new();
        cancel.cancel();
        let record = run_binding(&contract, &wave, loader, &cancel, Budget::default()).unwrap();
        assert_eq!(record.termination, Termination::Cancelled);
        assert_eq!(record.total_steps, 0);
    }

    #[test]
    fn step_budget_terminates_before_wave_completion() {
        register_null_sink();
        let dir = tempfile::tempdir().unwrap();
        let loader = build_loader(dir.path(), 10);
        let contract = write_json(
            dir.path(),
            "contract.json",
            r#"{"nodes":[{"id":"src","canonical_type":"tsi.source.dataloader"},{"id":"sink","canonical_type":"tsi.sink.null"}],
                "edges":[{"src":"src","src_port":"payload","dst":"sink","dst_port":"step"}],
                "source_node":"src","dataloader_init_id":"main"}"#,
        );
        let wave = write_json(dir.path(), "wave.json", r#"{"max_steps":10}"#);
        let budget = Budget { max_wallclock: None, max_steps: Some(2) };
        let record = run_binding(&contract, &wave, loader, &CancelToken::new(), budget).unwrap();
        assert_eq!(record.termination, Termination::BudgetExhausted);
        assert_eq!(record.total_steps, 2);
    }
}
