//! Single-threaded, cooperative step execution (spec §4.6). A step pulls
//! one batch from the source, propagates it along outbound edges in
//! topological order, and invokes each non-source node's component once.

use std::collections::HashMap;
use std::sync::Arc;

use tsi_dataset::{Batch, DataLoader};
use tsi_types::error::CoreError;

use crate::circuit::Circuit;
use crate::component::{instantiate, NodeComponent, PortValue, StepIo};

/// One scheduler bound to a compiled circuit and the dataloader its source
/// node pulls from. Owns a live [`NodeComponent`] instance per non-source
/// node, instantiated once at construction (spec §4.6 invokes the same
/// component across every step of a binding).
pub struct Scheduler {
    circuit: Circuit,
    dataloader: Arc<DataLoader>,
    components: HashMap<u32, Box<dyn NodeComponent>>,
}

/// What one `step()` produced, before the binding loop folds it into the
/// run record.
pub struct StepResult {
    pub loss: Option<f32>,
    pub exhausted: bool,
}

fn batch_to_port_value(batch: &Batch) -> PortValue {
    PortValue::Tensor {
        data: batch.tensor.clone(),
        shape: vec![batch.batch_size, batch.c, batch.t, batch.d],
    }
}

impl Scheduler {
    pub fn new(circuit: Circuit, dataloader: Arc<DataLoader>) -> Result<Self, CoreError> {
        let mut components = HashMap::new();
        for (i, node) in circuit.nodes.iter().enumerate() {
            let i = i as u32;
            if i == circuit.source_idx {
                continue;
            }
            components.insert(i, instantiate(&node.canonical_type)?);
        }
        Ok(Self { circuit, dataloader, components })
    }

    /// Runs one step. `exhausted=true` means the source had no more
    /// batches; every other field is meaningless in that case.
    pub fn step(&mut self) -> Result<StepResult, CoreError> {
        let Some(batch) = self.dataloader.next_batch()? else {
            return Ok(StepResult { loss: None, exhausted: true });
        };

        let n = self.circuit.nodes.len();
        let mut outbound_values: Vec<HashMap<&'static str, PortValue>> = (0..n).map(|_| HashMap::new()).collect();
        outbound_values[self.circuit.source_idx as usize].insert("payload", batch_to_port_value(&batch));

        let mut total_loss = 0.0f32;
        let mut loss_count = 0u32;

        for &idx in &self.circuit.topo_order {
            if idx == self.circuit.source_idx {
                continue;
            }
            let mut io = StepIo::default();
            for edge in &self.circuit.inbound[idx as usize] {
                if let Some(value) = outbound_values[edge.src as usize].get(edge.src_port).cloned() {
                    io.inbound.insert(edge.dst_port, value);
                }
            }

            let component = self
                .components
                .get_mut(&idx)
                .expect("every non-source node has an instantiated component");
            component.step(&mut io)?;

            if let Some(loss) = io.loss {
                total_loss += loss;
                loss_count += 1;
            }
            outbound_values[idx as usize] = io.outbound;
        }

        Ok(StepResult {
            loss: if loss_count > 0 { Some(total_loss / loss_count as f32) } else { None },
            exhausted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{ContractSpec, EdgeSpec, NodeSpec};
    use crate::component::builtins::register_null_sink;
    use std::io::Write;
    use tsi_dataset::sampler::SequentialSampler;
    use tsi_dataset::{binarize_csv, Channel, ConcatDataset, DataLoaderOptions};

    fn build_loader(dir: &std::path::Path) -> Arc<DataLoader> {
        let csv_path = dir.join("c.csv");
        std::fs::File::create(&csv_path).unwrap().write_all(b"timestamp,open\n1000,1.0\n2000,2.0\n3000,3.0\n").unwrap();
        let raw = dir.join("c.bin");
        let norm = dir.join("c.norm.bin");
        let sidecar = dir.join("c.schema.json");
        let schema = binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        let channel = Channel::open("kline", 1, 0, 1.0, &raw, &norm, schema).unwrap();
        let dataset = Arc::new(ConcatDataset::new(vec![channel]).unwrap());
        let opts = DataLoaderOptions { batch_size: 1, workers: 1, drop_last: false, queue_capacity: 2, timeout: std::time::Duration::from_secs(5) };
        Arc::new(DataLoader::new(dataset, Box::new(SequentialSampler), opts).unwrap())
    }

    #[test]
    fn one_step_propagates_a_batch_through_a_sink() {
        register_null_sink();
        let dir = tempfile::tempdir().unwrap();
        let loader = build_loader(dir.path());

        let spec = ContractSpec {
            nodes: vec![
                NodeSpec { id: "src".into(), canonical_type: "tsi.source.dataloader".into() },
                NodeSpec { id: "sink".into(), canonical_type: "tsi.sink.null".into() },
            ],
            edges: vec![EdgeSpec { src: "src".into(), src_port: "payload".into(), dst: "sink".into(), dst_port: "step".into() }],
            source_node: "src".into(),
            dataloader_init_id: "main".into(),
        };
        let circuit = crate::circuit::Circuit::compile(&spec).unwrap();
        let mut scheduler = Scheduler::new(circuit, loader).unwrap();
        let result = scheduler.step().unwrap();
        assert!(!result.exhausted);
    }

    #[test]
    fn step_reports_exhaustion_once_batches_run_out() {
        register_null_sink();
        let dir = tempfile::tempdir().unwrap();
        let loader = build_loader(dir.path());
        let spec = ContractSpec {
            nodes: vec![
                NodeSpec { id: "src".into(), canonical_type: "tsi.source.dataloader".into() },
                NodeSpec { id: "sink".into(), canonical_type: "tsi.sink.null".into() },
            ],
            edges: vec![EdgeSpec { src: "src".into(), src_port: "payload".into(), dst: "sink".into(), dst_port: "step".into() }],
            source_node: "src".into(),
            dataloader_init_id: "main".into(),
        };
        let circuit = crate::circuit::Circuit::compile(&spec).unwrap();
        let mut scheduler = Scheduler::new(circuit, loader).unwrap();
        assert!(!scheduler.step().unwrap().exhausted);
        assert!(!scheduler.step().unwrap().exhausted);
        assert!(!scheduler.step().unwrap().exhausted);
        assert!(scheduler.step().unwrap().exhausted);
    }
}
