//! JSONL task datasets and their model-ready samples.
//!
//! Items hold token ids that were produced offline by the task's tokenizer.

use candle_core::{Device, Tensor};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::TaskConfig;
use crate::generation::{AttentionMask, SequenceLayout};
use crate::inference::CommandTokens;
use crate::GlmError;

/// Batches are padded to a multiple of this length
pub const PAD_TILE: usize = 32;

/// `{"inputs": [...], "targets": [[...], ...]}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenerationItem {
    pub inputs: Vec<u32>,
    pub targets: Vec<Vec<u32>>,
}

/// `{"inputs": [...], "choices": [[...], ...], "label": n}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultiChoiceItem {
    pub inputs: Vec<u32>,
    pub choices: Vec<Vec<u32>>,
    pub label: usize,
}

/// Read one JSON value per non-empty line
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> crate::Result<Vec<T>> {
    let file = File::open(path)
        .map_err(|e| GlmError::DatasetError(format!("cannot open {}: {}", path.display(), e)))?;

    let mut items = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .map_err(|e| GlmError::DatasetError(format!("{}:{}: {}", path.display(), i + 1, e)))?;
        items.push(item);
    }
    Ok(items)
}

/// Keep the last tokens of `text` so that `reserved` more positions fit
fn truncate_left(text: &[u32], reserved: usize, max_seq_length: usize) -> Vec<u32> {
    if text.len() + reserved > max_seq_length {
        let keep = max_seq_length.saturating_sub(reserved);
        text[text.len() - keep..].to_vec()
    } else {
        text.to_vec()
    }
}

/// Encoded generation prompt over the full `max_seq_length` buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSample {
    /// Context followed by zero padding
    pub tokens: Vec<u32>,
    pub position_ids: Vec<u32>,
    pub mask: AttentionMask,
    /// Context length including the trailing `sop`
    pub context_length: usize,
}

impl GenerationSample {
    pub fn context(&self) -> &[u32] {
        &self.tokens[..self.context_length]
    }

    pub fn layout(&self) -> SequenceLayout {
        SequenceLayout {
            position_ids: self.position_ids.clone(),
            mask: self.mask.clone(),
        }
    }
}

/// Encode a generation prompt.
///
/// Text containing the mask token is filled in place; otherwise the mask and
/// `sop` are appended (or prepended for unidirectional attention).
pub fn build_generation_sample(
    text: &[u32],
    max_seq_length: usize,
    use_task_mask: bool,
    unidirectional: bool,
    commands: &CommandTokens,
) -> crate::Result<GenerationSample> {
    let mask_id = commands.generation_mask(use_task_mask);
    let sop = commands.sop;

    let (tokens, mask_position) = match text.iter().position(|&t| t == mask_id) {
        Some(mask_position) => {
            if unidirectional {
                return Err(GlmError::DatasetError(
                    "unidirectional attention doesn't support blank filling".to_string(),
                ));
            }
            if use_task_mask {
                return Err(GlmError::DatasetError("task mask doesn't support blank filling".to_string()));
            }
            let mut tokens = text.to_vec();
            tokens.push(sop);
            (tokens, mask_position)
        }
        None => {
            let mut tokens = Vec::with_capacity(text.len() + 2);
            if unidirectional {
                tokens.extend([mask_id, sop]);
                tokens.extend_from_slice(text);
            } else {
                tokens.extend_from_slice(text);
                tokens.extend([mask_id, sop]);
            }
            (tokens, text.len())
        }
    };

    let context_length = tokens.len();
    if context_length > max_seq_length {
        return Err(GlmError::DatasetError(format!(
            "context of {} tokens exceeds max_seq_length {}",
            context_length, max_seq_length
        )));
    }

    let mut position_ids: Vec<u32> = (0..max_seq_length as u32).collect();
    if !use_task_mask {
        position_ids[context_length - 1..].fill(mask_position as u32);
    }

    let mut mask = AttentionMask::causal(max_seq_length);
    if !unidirectional {
        mask.fill_block(0..context_length - 1, 0..context_length - 1);
    }

    let mut tokens = tokens;
    tokens.resize(max_seq_length, 0);

    Ok(GenerationSample {
        tokens,
        position_ids,
        mask,
        context_length,
    })
}

/// Generation items, left-truncated to leave room for the longest target
pub struct GenerationDataset {
    items: Vec<GenerationItem>,
    max_seq_length: usize,
    use_task_mask: bool,
    unidirectional: bool,
    commands: CommandTokens,
}

impl GenerationDataset {
    pub fn load(path: &Path, config: &TaskConfig, commands: CommandTokens) -> crate::Result<Self> {
        Self::from_items(read_jsonl(path)?, config, commands)
    }

    pub fn from_items(items: Vec<GenerationItem>, config: &TaskConfig, commands: CommandTokens) -> crate::Result<Self> {
        let items = items
            .into_iter()
            .map(|item| {
                let max_target = item
                    .targets
                    .iter()
                    .map(Vec::len)
                    .max()
                    .ok_or_else(|| GlmError::DatasetError("generation item without targets".to_string()))?;
                Ok(GenerationItem {
                    inputs: truncate_left(&item.inputs, max_target + 2, config.max_seq_length),
                    targets: item.targets,
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Self {
            items,
            max_seq_length: config.max_seq_length,
            use_task_mask: config.use_task_mask,
            unidirectional: config.unidirectional,
            commands,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[GenerationItem] {
        &self.items
    }

    pub fn sample(&self, index: usize) -> crate::Result<GenerationSample> {
        let item = self
            .items
            .get(index)
            .ok_or_else(|| GlmError::DatasetError(format!("no item {index}")))?;
        build_generation_sample(
            &item.inputs,
            self.max_seq_length,
            self.use_task_mask,
            self.unidirectional,
            &self.commands,
        )
    }
}

/// Encoded multiple-choice prompt with every choice appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiChoiceSample {
    pub tokens: Vec<u32>,
    pub position_ids: Vec<u32>,
    pub mask: AttentionMask,
    pub choices: Vec<Vec<u32>>,
    /// Positions whose logits predict each choice's tokens
    pub choice_target_ids: Vec<Vec<usize>>,
}

/// Encode a multiple-choice prompt.
///
/// Each choice becomes `sop + choice[..-1]` in its own causal block that sees
/// the whole context. In single-token mode only one block is built and every
/// choice is scored at its position.
pub fn build_multiple_choice_sample(
    text: &[u32],
    choices: &[Vec<u32>],
    is_single_token: bool,
    unified_multitask_encoding: bool,
    commands: &CommandTokens,
) -> crate::Result<MultiChoiceSample> {
    if choices.is_empty() {
        return Err(GlmError::DatasetError("item without choices".to_string()));
    }
    if choices.iter().any(Vec::is_empty) {
        return Err(GlmError::DatasetError("empty choice".to_string()));
    }

    let mut tokens = text.to_vec();
    let mut position_ids: Vec<u32> = (0..text.len() as u32).collect();

    let blank = text.iter().position(|&t| t == commands.mask);
    let mask_position = match blank {
        Some(position) => position,
        None => {
            tokens.push(commands.mask);
            position_ids.push(text.len() as u32);
            text.len()
        }
    };

    let division = tokens.len();
    let mut blocks = vec![AttentionMask::ones(division)];
    let mut choice_target_ids = Vec::new();

    for choice in choices {
        if is_single_token && choice.len() != 1 {
            return Err(GlmError::DatasetError("single-token dataset with a longer choice".to_string()));
        }
        let start = mask_position as u32;
        if blank.is_some() || !unified_multitask_encoding {
            position_ids.extend(std::iter::repeat(start).take(choice.len()));
        } else {
            position_ids.extend(start..start + choice.len() as u32);
        }
        choice_target_ids.push((tokens.len()..tokens.len() + choice.len()).collect());
        blocks.push(AttentionMask::causal(choice.len()));
        tokens.push(commands.sop);
        tokens.extend_from_slice(&choice[..choice.len() - 1]);

        if is_single_token {
            break;
        }
    }

    let mut mask = AttentionMask::block_diagonal(&blocks);
    mask.allow_prefix_columns(division);

    Ok(MultiChoiceSample {
        tokens,
        position_ids,
        mask,
        choices: choices.to_vec(),
        choice_target_ids,
    })
}

/// Multiple-choice items with the single-token flag of the whole file
pub struct MultiChoiceDataset {
    items: Vec<MultiChoiceItem>,
    is_single_token: bool,
    use_multitask_encoding: bool,
    commands: CommandTokens,
}

impl MultiChoiceDataset {
    pub fn load(path: &Path, config: &TaskConfig, commands: CommandTokens) -> crate::Result<Self> {
        Self::from_items(read_jsonl(path)?, config, commands)
    }

    pub fn from_items(items: Vec<MultiChoiceItem>, config: &TaskConfig, commands: CommandTokens) -> crate::Result<Self> {
        let mut is_single_token = true;
        let mut processed = Vec::with_capacity(items.len());

        for item in items {
            if item.label >= item.choices.len() {
                return Err(GlmError::DatasetError(format!(
                    "label {} out of range for {} choices",
                    item.label,
                    item.choices.len()
                )));
            }

            let mut target_length: usize = item.choices.iter().map(Vec::len).sum();
            if target_length == item.choices.len() {
                target_length = 1;
            }
            if target_length >= config.max_seq_length {
                return Err(GlmError::DatasetError(format!(
                    "choices need {} tokens, max_seq_length is {}",
                    target_length, config.max_seq_length
                )));
            }

            let inputs = truncate_left(&item.inputs, target_length + 2, config.max_seq_length);
            if config.use_multitask_encoding && inputs.contains(&commands.mask) {
                return Err(GlmError::DatasetError(
                    "unified multitask encoding doesn't support blank filling".to_string(),
                ));
            }
            if target_length != 1 {
                is_single_token = false;
            }

            processed.push(MultiChoiceItem { inputs, ..item });
        }

        Ok(Self {
            items: processed,
            is_single_token,
            use_multitask_encoding: config.use_multitask_encoding,
            commands,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[MultiChoiceItem] {
        &self.items
    }

    pub fn is_single_token(&self) -> bool {
        self.is_single_token
    }

    pub fn sample(&self, index: usize) -> crate::Result<MultiChoiceSample> {
        let item = self
            .items
            .get(index)
            .ok_or_else(|| GlmError::DatasetError(format!("no item {index}")))?;
        build_multiple_choice_sample(
            &item.inputs,
            &item.choices,
            self.is_single_token,
            self.use_multitask_encoding,
            &self.commands,
        )
    }

    /// Padded batch of the given items
    pub fn batch(&self, indices: &[usize]) -> crate::Result<MultiChoiceBatch> {
        let samples = indices
            .iter()
            .map(|&i| self.sample(i))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(collate(samples, self.is_single_token))
    }
}

/// Multiple-choice samples padded to a common length
#[derive(Debug, Clone)]
pub struct MultiChoiceBatch {
    pub tokens: Vec<Vec<u32>>,
    pub position_ids: Vec<Vec<u32>>,
    pub masks: Vec<AttentionMask>,
    pub choices: Vec<Vec<Vec<u32>>>,
    pub choice_target_ids: Vec<Vec<Vec<usize>>>,
    pub is_single_token: bool,
    /// Padded sequence length
    pub length: usize,
}

/// Pad samples with zeros to the longest one, rounded up to [`PAD_TILE`]
pub fn collate(samples: Vec<MultiChoiceSample>, is_single_token: bool) -> MultiChoiceBatch {
    let longest = samples.iter().map(|s| s.tokens.len()).max().unwrap_or(0);
    let length = longest.div_ceil(PAD_TILE) * PAD_TILE;

    let mut batch = MultiChoiceBatch {
        tokens: Vec::with_capacity(samples.len()),
        position_ids: Vec::with_capacity(samples.len()),
        masks: Vec::with_capacity(samples.len()),
        choices: Vec::with_capacity(samples.len()),
        choice_target_ids: Vec::with_capacity(samples.len()),
        is_single_token,
        length,
    };

    for mut sample in samples {
        sample.tokens.resize(length, 0);
        sample.position_ids.resize(length, 0);
        batch.tokens.push(sample.tokens);
        batch.position_ids.push(sample.position_ids);
        batch.masks.push(sample.mask.pad_to(length));
        batch.choices.push(sample.choices);
        batch.choice_target_ids.push(sample.choice_target_ids);
    }
    batch
}

impl MultiChoiceBatch {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens and position ids [batch, length], masks [batch, 1, length, length]
    pub fn to_tensors(&self, device: &Device) -> crate::Result<(Tensor, Tensor, Tensor)> {
        let (b, n) = (self.len(), self.length);
        let tokens = Tensor::from_vec(self.tokens.concat(), (b, n), device)?;
        let position_ids = Tensor::from_vec(self.position_ids.concat(), (b, n), device)?;
        let masks: Vec<u8> = self.masks.iter().flat_map(|m| m.as_slice().iter().copied()).collect();
        let masks = Tensor::from_vec(masks, (b, 1, n, n), device)?;
        Ok((tokens, position_ids, masks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{FilePattern, TaskType};

    const MASK: u32 = 20;
    const GMASK: u32 = 21;
    const SOP: u32 = 22;

    fn commands() -> CommandTokens {
        CommandTokens {
            mask: MASK,
            gmask: GMASK,
            smask: 25,
            sop: SOP,
            eop: 23,
            eos: 24,
        }
    }

    fn task(task_type: TaskType, max_seq_length: usize) -> TaskConfig {
        TaskConfig {
            name: "t".to_string(),
            task_type,
            path: "data".into(),
            file_pattern: FilePattern::Single("*.jsonl".to_string()),
            max_seq_length,
            use_task_mask: false,
            unidirectional: false,
            use_multitask_encoding: false,
            metrics: Vec::new(),
            sampling_strategy: Default::default(),
            num_beams: 4,
            length_penalty: 1.0,
            no_repeat_ngram_size: 3,
            min_tgt_length: 0,
        }
    }

    fn rows(mask: &AttentionMask) -> Vec<Vec<u8>> {
        mask.as_slice().chunks(mask.size()).map(|r| r.to_vec()).collect()
    }

    #[test]
    fn test_generation_sample_appends_mask() {
        let sample = build_generation_sample(&[1, 2, 3], 8, false, false, &commands()).unwrap();

        assert_eq!(sample.tokens, vec![1, 2, 3, MASK, SOP, 0, 0, 0]);
        assert_eq!(sample.context_length, 5);
        assert_eq!(sample.context(), &[1, 2, 3, MASK, SOP]);
        assert_eq!(sample.position_ids, vec![0, 1, 2, 3, 3, 3, 3, 3]);
        // context block fully visible, causal afterwards
        assert!(sample.mask.get(0, 3));
        assert!(!sample.mask.get(0, 4));
        assert!(sample.mask.get(4, 3));
        assert!(!sample.mask.get(4, 5));
    }

    #[test]
    fn test_generation_sample_task_mask_and_unidirectional() {
        let sample = build_generation_sample(&[1, 2], 6, true, true, &commands()).unwrap();
        assert_eq!(sample.tokens, vec![GMASK, SOP, 1, 2, 0, 0]);
        assert_eq!(sample.position_ids, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(sample.mask, AttentionMask::causal(6));
    }

    #[test]
    fn test_generation_sample_blank_filling() {
        let sample = build_generation_sample(&[1, MASK, 2], 6, false, false, &commands()).unwrap();
        assert_eq!(sample.tokens, vec![1, MASK, 2, SOP, 0, 0]);
        assert_eq!(sample.position_ids, vec![0, 1, 2, 1, 1, 1]);

        assert!(build_generation_sample(&[1, MASK, 2], 6, false, true, &commands()).is_err());
    }

    #[test]
    fn test_generation_truncates_left() {
        let items = vec![GenerationItem {
            inputs: (0..10).collect(),
            targets: vec![vec![1], vec![1, 2, 3]],
        }];
        let dataset = GenerationDataset::from_items(items, &task(TaskType::Generation, 10), commands()).unwrap();
        assert_eq!(dataset.items()[0].inputs, vec![5, 6, 7, 8, 9]);
        assert_eq!(dataset.sample(0).unwrap().context_length, 7);
    }

    #[test]
    fn test_multichoice_sample() {
        let sample = build_multiple_choice_sample(&[1, 2], &[vec![5, 6], vec![7]], false, false, &commands()).unwrap();

        assert_eq!(sample.tokens, vec![1, 2, MASK, SOP, 5, SOP]);
        assert_eq!(sample.position_ids, vec![0, 1, 2, 2, 2, 2]);
        assert_eq!(sample.choice_target_ids, vec![vec![3, 4], vec![5]]);
        assert_eq!(
            rows(&sample.mask),
            vec![
                vec![1, 1, 1, 0, 0, 0],
                vec![1, 1, 1, 0, 0, 0],
                vec![1, 1, 1, 0, 0, 0],
                vec![1, 1, 1, 1, 0, 0],
                vec![1, 1, 1, 1, 1, 0],
                vec![1, 1, 1, 0, 0, 1],
            ]
        );
    }

    #[test]
    fn test_multichoice_multitask_positions() {
        let sample = build_multiple_choice_sample(&[1], &[vec![5, 6, 7]], false, true, &commands()).unwrap();
        assert_eq!(sample.position_ids, vec![0, 1, 1, 2, 3]);
    }

    #[test]
    fn test_single_token_dataset() {
        let items = vec![
            MultiChoiceItem {
                inputs: vec![1, 2],
                choices: vec![vec![5], vec![6], vec![7]],
                label: 2,
            },
            MultiChoiceItem {
                inputs: vec![3],
                choices: vec![vec![8], vec![9]],
                label: 0,
            },
        ];
        let dataset = MultiChoiceDataset::from_items(items, &task(TaskType::Multichoice, 64), commands()).unwrap();
        assert!(dataset.is_single_token());

        let sample = dataset.sample(0).unwrap();
        assert_eq!(sample.tokens, vec![1, 2, MASK, SOP]);
        assert_eq!(sample.choice_target_ids, vec![vec![3]]);
        assert_eq!(sample.choices.len(), 3);
    }

    #[test]
    fn test_multichoice_rejects_bad_items() {
        let config = task(TaskType::Multichoice, 4);
        let too_long = vec![MultiChoiceItem {
            inputs: vec![1],
            choices: vec![vec![1, 2], vec![3, 4]],
            label: 0,
        }];
        assert!(MultiChoiceDataset::from_items(too_long, &config, commands()).is_err());

        let bad_label = vec![MultiChoiceItem {
            inputs: vec![1],
            choices: vec![vec![1]],
            label: 3,
        }];
        assert!(MultiChoiceDataset::from_items(bad_label, &config, commands()).is_err());

        let mut multitask = task(TaskType::Multichoice, 64);
        multitask.use_multitask_encoding = true;
        let blank = vec![MultiChoiceItem {
            inputs: vec![1, MASK],
            choices: vec![vec![1]],
            label: 0,
        }];
        assert!(MultiChoiceDataset::from_items(blank, &multitask, commands()).is_err());
    }

    #[test]
    fn test_collate_pads_to_tile() {
        let long: Vec<u32> = (0..40).collect();
        let samples = vec![
            build_multiple_choice_sample(&[1], &[vec![5, 6]], false, false, &commands()).unwrap(),
            build_multiple_choice_sample(&long, &[vec![5, 6]], false, false, &commands()).unwrap(),
        ];
        let batch = collate(samples, false);

        assert_eq!(batch.length, 64);
        assert!(batch.tokens.iter().all(|t| t.len() == 64));
        assert_eq!(&batch.tokens[0][..5], &[1, MASK, SOP, 5, 0]);
        assert_eq!(batch.masks[0].size(), 64);
        assert!(!batch.masks[0].get(10, 0));

        let (tokens, positions, masks) = batch.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(tokens.dims(), &[2, 64]);
        assert_eq!(positions.dims(), &[2, 64]);
        assert_eq!(masks.dims(), &[2, 1, 64, 64]);
    }

    #[test]
    fn test_read_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.jsonl");
        std::fs::write(&path, "{\"inputs\": [1], \"targets\": [[2]]}\n\n{\"inputs\": [3], \"targets\": [[4, 5]]}\n").unwrap();

        let items: Vec<GenerationItem> = read_jsonl(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].targets, vec![vec![4, 5]]);

        std::fs::write(&path, "{\"inputs\": [1]}\n").unwrap();
        let err = read_jsonl::<GenerationItem>(&path).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}
