//! Attention masks and position ids for GLM blank filling.

use candle_core::{Device, Tensor};
use std::ops::Range;

/// Dense square 0/1 attention matrix; `1` at (q, k) lets query q see key k.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionMask {
    size: usize,
    data: Vec<u8>,
}

impl AttentionMask {
    /// Nothing visible
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![0; size * size],
        }
    }

    /// Everything visible
    pub fn ones(size: usize) -> Self {
        Self {
            size,
            data: vec![1; size * size],
        }
    }

    /// Lower-triangular: each position sees itself and everything before it
    pub fn causal(size: usize) -> Self {
        let mut mask = Self::zeros(size);
        for q in 0..size {
            mask.data[q * size..q * size + q + 1].fill(1);
        }
        mask
    }

    /// Block-diagonal composition of square masks
    pub fn block_diagonal(blocks: &[AttentionMask]) -> Self {
        let size = blocks.iter().map(|b| b.size).sum();
        let mut mask = Self::zeros(size);
        let mut offset = 0;
        for block in blocks {
            for q in 0..block.size {
                let src = &block.data[q * block.size..(q + 1) * block.size];
                let dst = (offset + q) * size + offset;
                mask.data[dst..dst + block.size].copy_from_slice(src);
            }
            offset += block.size;
        }
        mask
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, q: usize, k: usize) -> bool {
        self.data[q * self.size + k] != 0
    }

    /// Make every key in `cols` visible to every query in `rows`
    pub fn fill_block(&mut self, rows: Range<usize>, cols: Range<usize>) {
        let rows = rows.start.min(self.size)..rows.end.min(self.size);
        let cols = cols.start.min(self.size)..cols.end.min(self.size);
        for q in rows {
            self.data[q * self.size + cols.start..q * self.size + cols.end].fill(1);
        }
    }

    /// Make the first `count` keys visible to every query
    pub fn allow_prefix_columns(&mut self, count: usize) {
        self.fill_block(0..self.size, 0..count);
    }

    /// Top-left `size` x `size` corner
    pub fn truncate(&self, size: usize) -> Self {
        let size = size.min(self.size);
        let mut data = Vec::with_capacity(size * size);
        for q in 0..size {
            data.extend_from_slice(&self.data[q * self.size..q * self.size + size]);
        }
        Self { size, data }
    }

    /// Grow to `size` with invisible padding rows and columns
    pub fn pad_to(&self, size: usize) -> Self {
        if size <= self.size {
            return self.clone();
        }
        let mut mask = Self::zeros(size);
        for q in 0..self.size {
            mask.data[q * size..q * size + self.size]
                .copy_from_slice(&self.data[q * self.size..(q + 1) * self.size]);
        }
        mask
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// `u8` tensor of shape [1, 1, size, size]
    pub fn to_tensor(&self, device: &Device) -> crate::Result<Tensor> {
        Ok(Tensor::from_vec(self.data.clone(), (1, 1, self.size, self.size), device)?)
    }
}

/// Position ids and attention mask for a whole sequence buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceLayout {
    pub position_ids: Vec<u32>,
    pub mask: AttentionMask,
}

impl SequenceLayout {
    /// `[gMASK]` generation: the context is visible to every position and
    /// positions simply count up.
    ///
    /// `context_length` includes the trailing `sop` token.
    pub fn gmask(len: usize, context_length: usize) -> Self {
        let mut mask = AttentionMask::causal(len);
        mask.allow_prefix_columns(context_length.saturating_sub(1));

        Self {
            position_ids: (0..len as u32).collect(),
            mask,
        }
    }

    /// `[MASK]` filling: like [`SequenceLayout::gmask`], but every generated
    /// position reuses the position of the mask token it fills.
    pub fn mask(len: usize, context_length: usize, mask_position: usize) -> Self {
        let mut layout = Self::gmask(len, context_length);
        let start = context_length.saturating_sub(1).min(len);
        layout.position_ids[start..].fill(mask_position as u32);
        layout
    }

    pub fn len(&self) -> usize {
        self.position_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position_ids.is_empty()
    }

    /// Tensors for the first `len` positions: ids [1, len] and mask [1, 1, len, len]
    pub fn prefix_tensors(&self, len: usize, device: &Device) -> crate::Result<(Tensor, Tensor)> {
        let len = len.min(self.len());
        let position_ids = Tensor::from_vec(self.position_ids[..len].to_vec(), (1, len), device)?;
        let mask = self.mask.truncate(len).to_tensor(device)?;
        Ok((position_ids, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(mask: &AttentionMask) -> Vec<Vec<u8>> {
        mask.as_slice().chunks(mask.size()).map(|r| r.to_vec()).collect()
    }

    #[test]
    fn test_causal() {
        assert_eq!(
            rows(&AttentionMask::causal(3)),
            vec![vec![1, 0, 0], vec![1, 1, 0], vec![1, 1, 1]]
        );
    }

    #[test]
    fn test_gmask_layout() {
        // context: 3 tokens + sop
        let layout = SequenceLayout::gmask(5, 4);

        assert_eq!(layout.position_ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            rows(&layout.mask),
            vec![
                vec![1, 1, 1, 0, 0],
                vec![1, 1, 1, 0, 0],
                vec![1, 1, 1, 0, 0],
                vec![1, 1, 1, 1, 0],
                vec![1, 1, 1, 1, 1],
            ]
        );
    }

    #[test]
    fn test_mask_layout_positions() {
        let layout = SequenceLayout::mask(6, 4, 1);
        assert_eq!(layout.position_ids, vec![0, 1, 2, 1, 1, 1]);
        assert_eq!(layout.mask, SequenceLayout::gmask(6, 4).mask);
    }

    #[test]
    fn test_block_diagonal() {
        let mask = AttentionMask::block_diagonal(&[AttentionMask::ones(2), AttentionMask::causal(2)]);
        assert_eq!(
            rows(&mask),
            vec![
                vec![1, 1, 0, 0],
                vec![1, 1, 0, 0],
                vec![0, 0, 1, 0],
                vec![0, 0, 1, 1],
            ]
        );
    }

    #[test]
    fn test_truncate_and_pad() {
        let mask = AttentionMask::causal(4);
        assert_eq!(mask.truncate(2), AttentionMask::causal(2));

        let padded = AttentionMask::ones(2).pad_to(3);
        assert_eq!(rows(&padded), vec![vec![1, 1, 0], vec![1, 1, 0], vec![0, 0, 0]]);
    }

    #[test]
    fn test_prefix_tensors() {
        let layout = SequenceLayout::gmask(8, 3);
        let (ids, mask) = layout.prefix_tensors(5, &Device::Cpu).unwrap();

        assert_eq!(ids.dims(), &[1, 5]);
        assert_eq!(mask.dims(), &[1, 1, 5, 5]);
        assert_eq!(ids.to_vec2::<u32>().unwrap(), vec![vec![0, 1, 2, 3, 4]]);
    }
}
