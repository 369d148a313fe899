//! Concat dataset (spec §3/§4.6): combines one mmap-backed channel per
//! active `ChannelForm` into `[C, T, D]` samples anchored on a master
//! channel's own timestamp sequence.

use tsi_dsl::observation::ObservationInstruction;
use tsi_types::error::{CoreError, SemanticError};

use crate::mmap_file::{validate_pair, MmapRecordFile};
use crate::schema::RecordSchema;

/// One feature stream: a channel's normalized binary, plus the raw binary
/// it was validated against at open time.
pub struct Channel {
    pub record_type: String,
    pub seq_length: usize,
    pub future_seq_length: usize,
    pub channel_weight: f32,
    norm: MmapRecordFile,
}

impl Channel {
    pub fn open(record_type: impl Into<String>, seq_length: u32, future_seq_length: u32, channel_weight: f32, raw_path: impl AsRef<std::path::Path>, norm_path: impl AsRef<std::path::Path>, schema: RecordSchema) -> Result<Self, CoreError> {
        let raw = MmapRecordFile::open(raw_path, schema.clone())?;
        let norm = MmapRecordFile::open(norm_path, schema)?;
        validate_pair(&raw, &norm)?;
        Ok(Self {
            record_type: record_type.into(),
            seq_length: seq_length as usize,
            future_seq_length: future_seq_length as usize,
            channel_weight,
            norm,
        })
    }

    pub fn feature_width(&self) -> usize {
        self.norm.schema().width()
    }

    pub fn record_count(&self) -> usize {
        self.norm.record_count()
    }
}

/// One decoded `[C, T, D]` sample (plus an optional `[C, Tf, D]` future
/// sample) for a single anchor timestamp.
#[derive(Debug, Clone)]
pub struct Sample {
    pub anchor_timestamp_ms: i64,
    pub c: usize,
    pub t: usize,
    pub d: usize,
    /// Row-major `[C, T, D]`.
    pub tensor: Vec<f32>,
    /// Row-major `[C, T]`, `1` where `tensor` holds a real record.
    pub mask: Vec<u8>,
    pub tf: usize,
    pub future_tensor: Option<Vec<f32>>,
    pub future_mask: Option<Vec<u8>>,
}

/// Multi-channel, timestamp-anchored dataset (spec §3/§4.6).
pub struct ConcatDataset {
    channels: Vec<Channel>,
    master_idx: usize,
    d: usize,
    t: usize,
    tf: usize,
}

impl ConcatDataset {
    /// `master_idx` selects which channel's own timestamp sequence drives
    /// sample indexing (spec §4.6, "the master channel's timestamp
    /// sequence"); the instruction doesn't name one explicitly, so the
    /// first active channel in declaration order is used.
    pub fn new(channels: Vec<Channel>) -> Result<Self, CoreError> {
        if channels.is_empty() {
            return Err(CoreError::Semantic(SemanticError("concat dataset requires at least one active channel".into())));
        }
        let d = channels[0].feature_width();
        if channels.iter().any(|c| c.feature_width() != d) {
            return Err(CoreError::Semantic(SemanticError(
                "every active channel in a concat dataset must share one feature width D".into(),
            )));
        }
        let t = channels.iter().map(|c| c.seq_length).max().unwrap_or(0);
        let tf = channels.iter().map(|c| c.future_seq_length).max().unwrap_or(0);
        Ok(Self {
            channels,
            master_idx: 0,
            d,
            t,
            tf,
        })
    }

    pub fn len(&self) -> usize {
        self.channels[self.master_idx].record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn window(channel: &Channel, anchor_ts: i64, length: usize, d: usize, future: bool) -> (Vec<f32>, Vec<u8>) {
        let mut tensor = vec![0.0f32; length * d];
        let mut mask = vec![0u8; length];
        if length == 0 {
            return (tensor, mask);
        }
        let Some(floor_idx) = channel.norm.find_floor(anchor_ts) else {
            return (tensor, mask);
        };
        for t in 0..length {
            let idx = if future {
                floor_idx as i64 + 1 + t as i64
            } else {
                floor_idx as i64 - (length as i64 - 1) + t as i64
            };
            if idx < 0 || idx as usize >= channel.record_count() {
                continue;
            }
            let idx = idx as usize;
            let fields = channel.norm.fields_at(idx);
            let present = fields.iter().all(|v| v.is_finite());
            if present {
                for (k, v) in fields.iter().enumerate() {
                    tensor[t * d + k] = *v as f32;
                }
                mask[t] = 1;
            }
        }
        (tensor, mask)
    }

    /// Builds sample `i`: anchor timestamp is the master channel's own
    /// timestamp at row `i` (spec §4.6: "stepping the master channel's
    /// timestamp sequence by a stride of 1").
    pub fn sample(&self, i: usize) -> Result<Sample, CoreError> {
        if i >= self.len() {
            return Err(CoreError::Semantic(SemanticError(format!("sample index {i} out of range"))));
        }
        let anchor_timestamp_ms = self.channels[self.master_idx].norm.timestamp_at(i);

        let c = self.channels.len();
        let mut tensor = vec![0.0f32; c * self.t * self.d];
        let mut mask = vec![0u8; c * self.t];
        let mut future_tensor = if self.tf > 0 { Some(vec![0.0f32; c * self.tf * self.d]) } else { None };
        let mut future_mask = if self.tf > 0 { Some(vec![0u8; c * self.tf]) } else { None };

        for (ci, channel) in self.channels.iter().enumerate() {
            let (ch_tensor, ch_mask) = Self::window(channel, anchor_timestamp_ms, channel.seq_length, self.d, false);
            for t in 0..channel.seq_length {
                let dst = (ci * self.t + t) * self.d;
                let src = t * self.d;
                tensor[dst..dst + self.d].copy_from_slice(&ch_tensor[src..src + self.d]);
                mask[ci * self.t + t] = ch_mask[t];
            }

            if channel.future_seq_length > 0 {
                let (fut_tensor, fut_mask) = Self::window(channel, anchor_timestamp_ms, channel.future_seq_length, self.d, true);
                if let (Some(ft), Some(fm)) = (future_tensor.as_mut(), future_mask.as_mut()) {
                    for t in 0..channel.future_seq_length {
                        let dst = (ci * self.tf + t) * self.d;
                        let src = t * self.d;
                        ft[dst..dst + self.d].copy_from_slice(&fut_tensor[src..src + self.d]);
                        fm[ci * self.tf + t] = fut_mask[t];
                    }
                }
            }
        }

        Ok(Sample {
            anchor_timestamp_ms,
            c,
            t: self.t,
            d: self.d,
            tensor,
            mask,
            tf: self.tf,
            future_tensor,
            future_mask,
        })
    }

    pub fn channel_weights(&self) -> Vec<f32> {
        self.channels.iter().map(|c| c.channel_weight).collect()
    }
}

/// Resolves an [`ObservationInstruction`] plus a target `instrument` into
/// an ordered list of active channels ready to pass to [`ConcatDataset::new`].
/// `locate` maps a source form's `source_path` to its `(raw, norm, schema)`
/// triple on disk — callers own the actual binarization step.
pub fn resolve_channels<F>(instruction: &ObservationInstruction, instrument: &str, mut locate: F) -> Result<Vec<Channel>, CoreError>
where
    F: FnMut(&str) -> Result<(std::path::PathBuf, std::path::PathBuf, RecordSchema), CoreError>,
{
    let mut channels = Vec::new();
    for form in instruction.channel_forms.iter().filter(|c| c.active) {
        let interval = form
            .interval
            .ok_or_else(|| CoreError::Semantic(SemanticError("active channel form is missing its interval".into())))?;
        let matches = instruction.filter_source_forms(instrument, interval, &form.record_type);
        let source = matches.first().ok_or_else(|| {
            CoreError::Reference(tsi_types::error::ReferenceError(format!(
                "no source form for instrument={instrument} interval={interval} record_type={}",
                form.record_type
            )))
        })?;
        let (raw_path, norm_path, schema) = locate(&source.source_path)?;
        channels.push(Channel::open(
            form.record_type.clone(),
            form.seq_length,
            form.future_seq_length,
            form.channel_weight,
            raw_path,
            norm_path,
            schema,
        )?);
    }
    if channels.is_empty() {
        return Err(CoreError::Semantic(SemanticError("no active channels resolved to a source form".into())));
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binarize::binarize_csv;
    use std::io::Write;
    use tsi_dsl::observation::{ChannelForm, SourceForm};
    use tsi_types::domain::Interval;

    fn write_csv(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn open_channel(dir: &std::path::Path, csv_body: &str, seq_length: u32, future_seq_length: u32) -> Channel {
        let csv = write_csv(dir, "c.csv", csv_body);
        let raw = dir.join("c.bin");
        let norm = dir.join("c.norm.bin");
        let sidecar = dir.join("c.schema.json");
        let schema = binarize_csv(&csv, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        Channel::open("kline", seq_length, future_seq_length, 1.0, &raw, &norm, schema).unwrap()
    }

    #[test]
    fn sample_masks_padding_past_file_start() {
        let dir = tempfile::tempdir().unwrap();
        let channel = open_channel(dir.path(), "timestamp,open\n1000,1.0\n2000,2.0\n3000,3.0\n", 3, 0);
        let dataset = ConcatDataset::new(vec![channel]).unwrap();
        let sample = dataset.sample(0).unwrap();
        assert_eq!(sample.mask, vec![0, 0, 1]);
        assert_eq!(sample.tensor[2 * sample.d], 1.0);
    }

    #[test]
    fn sample_includes_future_window_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let channel = open_channel(dir.path(), "timestamp,open\n1000,1.0\n2000,2.0\n3000,3.0\n", 1, 2);
        let dataset = ConcatDataset::new(vec![channel]).unwrap();
        let sample = dataset.sample(0).unwrap();
        let future_mask = sample.future_mask.unwrap();
        assert_eq!(future_mask, vec![1, 1]);
        let future_tensor = sample.future_tensor.unwrap();
        assert_eq!(future_tensor[0], 2.0);
        assert_eq!(future_tensor[sample.d], 3.0);
    }

    #[test]
    fn resolve_channels_matches_instruction_against_instrument() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), "BTCUSDT_1m_kline.csv", "timestamp,open\n1000,1.0\n2000,2.0\n");

        let mut instruction = ObservationInstruction::default();
        instruction.source_forms.push(SourceForm {
            instrument: "BTCUSDT".into(),
            interval: Some(Interval::OneMinute),
            record_type: "kline".into(),
            norm_window: 0,
            source_path: csv.display().to_string(),
        });
        instruction.channel_forms.push(ChannelForm {
            interval: Some(Interval::OneMinute),
            record_type: "kline".into(),
            active: true,
            seq_length: 2,
            future_seq_length: 0,
            channel_weight: 1.0,
        });

        let channels = resolve_channels(&instruction, "BTCUSDT", |source_path| {
            let raw = dir.path().join("r.bin");
            let norm = dir.path().join("r.norm.bin");
            let sidecar = dir.path().join("r.schema.json");
            let schema = binarize_csv(source_path, "kline", 0, &raw, &norm, &sidecar, false)?;
            Ok((raw, norm, schema))
        })
        .unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].record_type, "kline");
    }
}
