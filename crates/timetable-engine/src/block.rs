//! Merge base-timetable periods into logical blocks.
//!
//! A block is the maximal contiguous run of periods on one day that share a
//! `block_id`. Entries without a `block_id` are blocks of one period. Blocks
//! are never stored; they are recomputed from the entry list on every read.

use std::collections::BTreeMap;

use crate::model::{BlockId, TimetableEntry};

/// One continuous teaching session.
#[derive(Debug, Clone, PartialEq)]
pub struct Block<'a> {
    pub day_of_week: u8,
    pub start_period: u8,
    pub end_period: u8,
    /// Member entries in period order. Never empty.
    pub entries: Vec<&'a TimetableEntry>,
}

impl<'a> Block<'a> {
    /// The entry whose fields represent the block.
    pub fn head(&self) -> &'a TimetableEntry {
        self.entries[0]
    }

    pub fn block_id(&self) -> Option<&'a BlockId> {
        self.head().block_id.as_ref()
    }
}

/// Group entries into blocks, sorted by day then start period.
///
/// The write path guarantees that a block's periods are contiguous. If a gap
/// does exist (for example because a substitution consumed the middle
/// period), the group is split at the gap rather than spanning it; nothing
/// is repaired.
pub fn merge_blocks<'a>(entries: &[&'a TimetableEntry]) -> Vec<Block<'a>> {
    let mut grouped: BTreeMap<(u8, &'a BlockId), Vec<&'a TimetableEntry>> = BTreeMap::new();
    let mut blocks = Vec::new();

    for &entry in entries {
        match &entry.block_id {
            Some(block_id) => grouped
                .entry((entry.day_of_week, block_id))
                .or_default()
                .push(entry),
            None => blocks.push(Block {
                day_of_week: entry.day_of_week,
                start_period: entry.period,
                end_period: entry.period,
                entries: vec![entry],
            }),
        }
    }

    for ((day, _), mut members) in grouped {
        members.sort_by_key(|e| (e.period, e.id));
        let mut current: Option<Block<'a>> = None;
        for entry in members {
            match current.as_mut() {
                Some(block) if entry.period == block.end_period => {
                    // Duplicate period inside one block; keep the first row.
                    continue;
                }
                Some(block) if entry.period == block.end_period + 1 => {
                    block.end_period = entry.period;
                    block.entries.push(entry);
                }
                _ => {
                    if let Some(done) = current.take() {
                        blocks.push(done);
                    }
                    current = Some(Block {
                        day_of_week: day,
                        start_period: entry.period,
                        end_period: entry.period,
                        entries: vec![entry],
                    });
                }
            }
        }
        if let Some(done) = current {
            blocks.push(done);
        }
    }

    blocks.sort_by_key(|b| (b.day_of_week, b.start_period, b.end_period));
    blocks
}
