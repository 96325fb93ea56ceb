//! 批注存储
//!
//! 职责：
//! - 按 (at, id) 升序保存尚未展示的批注
//! - 按 id 去重（快照与广播都必须经过 `ingest`）
//! - 维护游标 `last_seen_id`
//! - 出队到期批注，保证每个 id 只出队一次

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::annotation::Annotation;

/// 会话内共享的存储句柄
pub type SharedStore = Arc<Mutex<AnnotationStore>>;

/// 展示租约
///
/// 同一存储同时只允许一个调度器出队；新租约会使旧租约失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealLease(u64);

/// 批注存储（每个会话独占一个实例）
#[derive(Debug, Default)]
pub struct AnnotationStore {
    /// 待展示批注：(at, id) -> Annotation
    pending: BTreeMap<(u64, u64), Annotation>,
    /// pending 中的 id 集合
    pending_ids: HashSet<u64>,
    /// 已展示过的 id，重复投递时直接忽略
    revealed: HashSet<u64>,
    /// 已观察到的最大 id
    last_seen_id: u64,
    /// 当前有效租约代数
    lease_generation: u64,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建共享存储
    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    /// 用快照替换待展示列表
    ///
    /// 逐条经过 `ingest`，同一快照重复调用不会产生重复条目；
    /// 已展示过的 id 不会重新进入待展示列表。
    pub fn seed(&mut self, annotations: impl IntoIterator<Item = Annotation>) {
        self.pending.clear();
        self.pending_ids.clear();

        let mut inserted = 0usize;
        for annotation in annotations {
            if self.ingest(annotation) {
                inserted += 1;
            }
        }

        debug!(
            "快照已载入: inserted={}, pending={}, last_seen_id={}",
            inserted,
            self.pending.len(),
            self.last_seen_id
        );
    }

    /// 插入一条批注
    ///
    /// 返回是否为新插入；同 id 已在待展示列表或已展示过时返回 false。
    /// 无论是否插入，游标都会推进到 `max(last_seen_id, id)`。
    pub fn ingest(&mut self, annotation: Annotation) -> bool {
        self.last_seen_id = self.last_seen_id.max(annotation.id);

        if self.pending_ids.contains(&annotation.id) || self.revealed.contains(&annotation.id) {
            debug!("🔄 重复批注，忽略: id={}", annotation.id);
            return false;
        }

        self.pending_ids.insert(annotation.id);
        self.pending.insert(annotation.order_key(), annotation);
        true
    }

    /// 出队所有 `at <= time` 的批注（按 (at, id) 升序）
    pub fn drain_due_by(&mut self, time: u64) -> Vec<Annotation> {
        // split_off 返回 >= 分界键的部分，(time + 1, 0) 之前的即为到期批注
        let remaining = match time.checked_add(1) {
            Some(bound) => self.pending.split_off(&(bound, 0)),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.pending, remaining);

        let mut drained = Vec::with_capacity(due.len());
        for (_, annotation) in due {
            self.pending_ids.remove(&annotation.id);
            self.revealed.insert(annotation.id);
            drained.push(annotation);
        }
        drained
    }

    /// 获取新的展示租约，之前的租约随即失效
    pub fn acquire_reveal_lease(&mut self) -> RevealLease {
        self.lease_generation += 1;
        RevealLease(self.lease_generation)
    }

    /// 租约是否仍然有效
    pub fn is_lease_current(&self, lease: &RevealLease) -> bool {
        lease.0 == self.lease_generation
    }

    /// 持租约出队；租约已被取代时返回 None 且不修改任何状态
    pub fn drain_due_by_leased(&mut self, lease: &RevealLease, time: u64) -> Option<Vec<Annotation>> {
        if !self.is_lease_current(lease) {
            return None;
        }
        Some(self.drain_due_by(time))
    }

    /// 释放租约（仅当它仍是当前租约时）
    pub fn release_reveal_lease(&mut self, lease: &RevealLease) {
        if self.is_lease_current(lease) {
            self.lease_generation += 1;
        }
    }

    pub fn last_seen_id(&self) -> u64 {
        self.last_seen_id
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 是否在待展示列表中
    pub fn contains(&self, id: u64) -> bool {
        self.pending_ids.contains(&id)
    }

    pub fn was_revealed(&self, id: u64) -> bool {
        self.revealed.contains(&id)
    }

    /// 最早一条待展示批注的时间
    pub fn next_due_at(&self) -> Option<u64> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    /// 按展示顺序遍历待展示批注
    pub fn pending(&self) -> impl Iterator<Item = &Annotation> {
        self.pending.values()
    }
}
