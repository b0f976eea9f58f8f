//! 无锁快照列表
//!
//! `DashMap` 负责按 ID 定位，`ArcSwap` 保存有序的不可变槽位列表，
//! 每个槽位本身也是 `ArcSwap`，读者永远拿到完整的旧值或新值。
//! 整体替换只需原子地换掉列表指针。

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 可按 ID 索引的元素
pub trait Keyed {
    fn key(&self) -> &str;
}

/// 单个元素的可替换槽位
pub type Slot<T> = Arc<ArcSwap<T>>;

/// 并发快照列表
pub struct SlotList<T> {
    index: DashMap<String, Slot<T>>,
    order: ArcSwap<Vec<Slot<T>>>,
    cursor: AtomicUsize,
}

impl<T> SlotList<T>
where
    T: Keyed + Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            order: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// 整体替换
    ///
    /// 选择只读 `order`，所以读者看到的要么是完整旧列表，要么是完整新列表。
    pub fn replace_all(&self, items: Vec<T>) {
        let slots: Vec<Slot<T>> = items
            .into_iter()
            .map(|item| Arc::new(ArcSwap::from_pointee(item)))
            .collect();
        let keep: HashSet<String> = slots.iter().map(|s| s.load().key().to_string()).collect();

        for slot in &slots {
            let key = slot.load().key().to_string();
            self.index.insert(key, slot.clone());
        }
        self.order.store(Arc::new(slots));
        self.index.retain(|key, _| keep.contains(key));
    }

    /// 从游标开始轮询，返回第一个满足条件的元素
    ///
    /// 并发下游标推进是近似公平的，但每个元素是否满足条件的判断是精确的。
    pub fn select_next<F>(&self, accept: F) -> Option<Arc<T>>
    where
        F: Fn(&T) -> bool,
    {
        let list = self.order.load();
        let len = list.len();
        if len == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for step in 0..len {
            let item = list[(start + step) % len].load_full();
            if accept(&item) {
                if step > 0 {
                    // 跳过的不可用元素不占用后续轮次
                    self.cursor.fetch_add(step, Ordering::Relaxed);
                }
                return Some(item);
            }
        }
        None
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.index.get(key).map(|slot| slot.load_full())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// 原地更新单个元素，返回更新后的值
    pub fn update(&self, key: &str, f: &mut dyn FnMut(&mut T)) -> Option<Arc<T>> {
        let slot = self.index.get(key).map(|entry| entry.value().clone())?;
        slot.rcu(|current| {
            let mut next = T::clone(current);
            f(&mut next);
            next
        });
        Some(slot.load_full())
    }

    /// 用新元素替换旧元素，保持其在轮询顺序中的位置
    ///
    /// 旧元素不存在时追加到末尾，返回值表示旧元素是否存在。
    pub fn swap(&self, old_key: &str, replacement: T) -> bool {
        let new_key = replacement.key().to_string();
        let new_slot: Slot<T> = Arc::new(ArcSwap::from_pointee(replacement));
        let mut replaced = false;

        self.order.rcu(|list| {
            replaced = false;
            let mut next: Vec<Slot<T>> = Vec::with_capacity(list.len() + 1);
            for slot in list.iter() {
                let key = slot.load().key().to_string();
                if key == old_key {
                    next.push(new_slot.clone());
                    replaced = true;
                } else if key != new_key {
                    next.push(slot.clone());
                }
            }
            if !replaced {
                next.push(new_slot.clone());
            }
            next
        });

        self.index.remove(old_key);
        self.index.insert(new_key, new_slot);
        replaced
    }

    /// 当前快照（按轮询顺序）
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.order.load().iter().map(|slot| slot.load_full()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for SlotList<T>
where
    T: Keyed + Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}
