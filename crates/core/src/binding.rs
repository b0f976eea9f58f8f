//! 代理绑定索引
//!
//! 代理 ID -> 按优先级升序排列的绑定列表。解析时先取最高优先级（数值最小）
//! 的活跃绑定；同一优先级下有多个活跃绑定时，按每个代理独立的游标轮询。

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 代理与凭证的绑定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    pub proxy_id: String,
    pub credential_id: String,
    /// 1 为首选，数值越大越靠后
    pub priority: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(proxy_id: impl Into<String>, credential_id: impl Into<String>, priority: u32) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            credential_id: credential_id.into(),
            priority,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// 绑定解析结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingResolution {
    pub proxy_id: String,
    pub credential_id: String,
    pub priority: u32,
}

/// 绑定索引
#[derive(Default)]
pub struct BindingIndex {
    by_proxy: ArcSwap<HashMap<String, Vec<Binding>>>,
    cursors: DashMap<String, Arc<AtomicUsize>>,
}

impl BindingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: Vec<Binding>) -> Self {
        let index = Self::new();
        index.replace_all(bindings);
        index
    }

    /// 整体替换（重新加载时使用），保留仍存在代理的游标
    pub fn replace_all(&self, bindings: Vec<Binding>) {
        let mut grouped: HashMap<String, Vec<Binding>> = HashMap::new();
        for binding in bindings {
            grouped
                .entry(binding.proxy_id.clone())
                .or_default()
                .push(binding);
        }
        for list in grouped.values_mut() {
            list.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
        }
        self.cursors.retain(|proxy_id, _| grouped.contains_key(proxy_id));
        tracing::debug!("[BindingIndex] 已加载 {} 个代理的绑定", grouped.len());
        self.by_proxy.store(Arc::new(grouped));
    }

    /// 解析代理首选凭证
    pub fn resolve(&self, proxy_id: &str) -> Option<BindingResolution> {
        self.resolve_with(proxy_id, |_| true)
    }

    /// 解析代理首选凭证，跳过调用方拒绝的凭证（例如冷却中）
    ///
    /// 整个优先级层都被拒绝时进入下一层；全部拒绝返回 None。
    pub fn resolve_with<F>(&self, proxy_id: &str, mut accept: F) -> Option<BindingResolution>
    where
        F: FnMut(&str) -> bool,
    {
        let map = self.by_proxy.load();
        let active: Vec<&Binding> = map.get(proxy_id)?.iter().filter(|b| b.active).collect();
        if active.is_empty() {
            return None;
        }

        let tick = self.cursor_for(proxy_id).fetch_add(1, Ordering::Relaxed);

        let mut start = 0;
        while start < active.len() {
            let priority = active[start].priority;
            let end = start
                + active[start..]
                    .iter()
                    .take_while(|b| b.priority == priority)
                    .count();
            let tier = &active[start..end];

            for step in 0..tier.len() {
                let binding = tier[(tick + step) % tier.len()];
                if accept(&binding.credential_id) {
                    return Some(BindingResolution {
                        proxy_id: binding.proxy_id.clone(),
                        credential_id: binding.credential_id.clone(),
                        priority: binding.priority,
                    });
                }
            }
            start = end;
        }
        None
    }

    /// 把指向旧凭证的绑定改指向新凭证，返回修改条数
    pub fn repoint(&self, from_credential: &str, to_credential: &str) -> usize {
        let mut changed = 0;
        self.by_proxy.rcu(|map| {
            changed = 0;
            let mut next = HashMap::clone(map);
            for list in next.values_mut() {
                for binding in list.iter_mut() {
                    if binding.credential_id == from_credential {
                        binding.credential_id = to_credential.to_string();
                        changed += 1;
                    }
                }
            }
            next
        });
        if changed > 0 {
            tracing::debug!(
                "[BindingIndex] {} 条绑定 {} -> {}",
                changed,
                from_credential,
                to_credential
            );
        }
        changed
    }

    pub fn bindings_for(&self, proxy_id: &str) -> Vec<Binding> {
        self.by_proxy
            .load()
            .get(proxy_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 绑定概览：代理 -> 活跃凭证 ID（按优先级）
    pub fn bindings_info(&self) -> BTreeMap<String, Vec<String>> {
        self.by_proxy
            .load()
            .iter()
            .map(|(proxy_id, list)| {
                let ids = list
                    .iter()
                    .filter(|b| b.active)
                    .map(|b| b.credential_id.clone())
                    .collect();
                (proxy_id.clone(), ids)
            })
            .collect()
    }

    /// 绑定总数
    pub fn len(&self) -> usize {
        self.by_proxy.load().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cursor_for(&self, proxy_id: &str) -> Arc<AtomicUsize> {
        self.cursors
            .entry(proxy_id.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_priority_one() {
        let index = BindingIndex::from_bindings(vec![
            Binding::new("p1", "k2", 2),
            Binding::new("p1", "k1", 1),
        ]);

        for _ in 0..5 {
            assert_eq!(index.resolve("p1").unwrap().credential_id, "k1");
        }
    }

    #[test]
    fn test_falls_back_when_primary_inactive() {
        let index = BindingIndex::from_bindings(vec![
            Binding::new("p1", "k1", 1).inactive(),
            Binding::new("p1", "k2", 2),
        ]);

        let resolved = index.resolve("p1").unwrap();
        assert_eq!(resolved.credential_id, "k2");
        assert_eq!(resolved.priority, 2);
    }

    #[test]
    fn test_no_binding() {
        let index = BindingIndex::from_bindings(vec![Binding::new("p1", "k1", 1).inactive()]);
        assert!(index.resolve("p1").is_none());
        assert!(index.resolve("p2").is_none());
    }

    #[test]
    fn test_same_priority_multiplexed() {
        let index = BindingIndex::from_bindings(vec![
            Binding::new("p1", "k1", 1),
            Binding::new("p1", "k2", 1),
            Binding::new("p1", "k3", 2),
        ]);

        let picked: Vec<String> = (0..4)
            .map(|_| index.resolve("p1").unwrap().credential_id)
            .collect();
        assert!(picked.contains(&"k1".to_string()));
        assert!(picked.contains(&"k2".to_string()));
        assert!(!picked.contains(&"k3".to_string()));
    }

    #[test]
    fn test_resolve_with_skips_rejected_tier() {
        let index = BindingIndex::from_bindings(vec![
            Binding::new("p1", "k1", 1),
            Binding::new("p1", "k2", 2),
        ]);

        let resolved = index.resolve_with("p1", |id| id != "k1").unwrap();
        assert_eq!(resolved.credential_id, "k2");
        assert!(index.resolve_with("p1", |_| false).is_none());
    }

    #[test]
    fn test_repoint() {
        let index = BindingIndex::from_bindings(vec![
            Binding::new("p1", "old", 1),
            Binding::new("p2", "old", 2),
            Binding::new("p2", "other", 1),
        ]);

        assert_eq!(index.repoint("old", "new"), 2);
        assert_eq!(index.resolve("p1").unwrap().credential_id, "new");
        let info = index.bindings_info();
        assert_eq!(info["p2"], vec!["other".to_string(), "new".to_string()]);
    }

    #[test]
    fn test_replace_all_drops_removed_proxy() {
        let index = BindingIndex::from_bindings(vec![Binding::new("p1", "k1", 1)]);
        index.replace_all(vec![Binding::new("p2", "k2", 1)]);

        assert!(index.resolve("p1").is_none());
        assert_eq!(index.len(), 1);
    }
}
