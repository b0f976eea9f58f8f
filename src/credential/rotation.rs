//! 凭证轮换
//!
//! 用一条未领取的备用凭证替换失效凭证。同一失效凭证的并发轮换只有一次生效：
//! 删除失效记录的影响行数是并发守卫，领取备用凭证是一次原子的查找并更新。
//! 备用凭证一旦领取就不再归还。

use super::classifier::RotationReason;
use super::pool::CredentialPool;
use crate::errors::RotationError;
use relaycast_core::credential::mask_secret;
use relaycast_core::{BindingIndex, Credential, CredentialStatus, SharedClock, Store, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 轮换协调器
pub struct RotationCoordinator {
    store: Arc<dyn Store>,
    bindings: Arc<BindingIndex>,
    clock: SharedClock,
    timeout: Duration,
}

impl RotationCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        bindings: Arc<BindingIndex>,
        clock: SharedClock,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            bindings,
            clock,
            timeout,
        }
    }

    /// 轮换失效凭证
    ///
    /// - `Ok(Some(new))`: 本次完成轮换
    /// - `Ok(None)`: 其它调用已完成轮换，本次什么都没做
    /// - `Err(Exhausted)`: 没有备用凭证，失效记录保留
    pub async fn rotate(
        &self,
        pool: &CredentialPool,
        failed_id: &str,
        reason: &RotationReason,
    ) -> Result<Option<Credential>, RotationError> {
        let provider = pool.provider();

        // 1. 先确认还有备用凭证，没有就不动任何记录
        let backup = self
            .bounded(
                "find_available_backup",
                self.store.find_available_backup(provider),
            )
            .await?;
        if backup.is_none() {
            // 失效记录已不在，说明其它调用刚用掉最后一条备用凭证完成了轮换
            let existing = self
                .bounded(
                    "find_credential",
                    self.store.find_credential(provider, failed_id),
                )
                .await?;
            if existing.is_none() {
                tracing::info!(
                    "[KeyRotation] {} 凭证 {} 已被轮换，跳过",
                    provider,
                    failed_id
                );
                return Ok(None);
            }
            tracing::warn!(
                "[KeyRotation] {} 没有可用的备用凭证，无法轮换 {}",
                provider,
                failed_id
            );
            return Err(RotationError::Exhausted);
        }

        // 删除前保留一份失效记录，领取失败时放回
        let failed = match pool.get(failed_id) {
            Some(cred) => Some(cred),
            None => {
                self.bounded(
                    "find_credential",
                    self.store.find_credential(provider, failed_id),
                )
                .await?
            }
        };

        // 2. 删除失效记录，影响行数为 0 说明已被其它调用轮换
        let deleted = self
            .bounded(
                "delete_credential",
                self.store.delete_credential(provider, failed_id),
            )
            .await?;
        if deleted == 0 {
            tracing::info!(
                "[KeyRotation] {} 凭证 {} 已被轮换，跳过",
                provider,
                failed_id
            );
            return Ok(None);
        }

        // 3. 原子领取备用凭证
        let now = self.clock.now();
        let claimed = match self
            .bounded(
                "claim_backup",
                self.store.claim_backup(provider, failed_id, now),
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.restore_as_exhausted(pool, failed.as_ref(), reason).await;
                return Err(e.into());
            }
        };
        let backup = match claimed {
            Some(backup) => backup,
            None => {
                tracing::warn!(
                    "[KeyRotation] {} 最后一条备用凭证已被其它轮换领取，{} 保留为耗尽",
                    provider,
                    failed_id
                );
                self.restore_as_exhausted(pool, failed.as_ref(), reason).await;
                return Err(RotationError::Exhausted);
            }
        };

        // 4. 以备用凭证的 ID 和 Key 插入新凭证
        let replacement = Credential::from_backup(&backup, now);
        if let Err(e) = self
            .bounded(
                "insert_credential",
                self.store.insert_credential(&replacement),
            )
            .await
        {
            // 领取不撤销，超时的插入仍可能已提交
            tracing::error!(
                "[KeyRotation] 插入新凭证 {} 失败，备用凭证保留为已领取 (used_for={}): {}",
                backup.id,
                failed_id,
                e
            );
            self.restore_as_exhausted(pool, failed.as_ref(), reason).await;
            return Err(e.into());
        }

        // 5. 绑定改指向新凭证，失败只记日志
        match self
            .bounded(
                "repoint_bindings",
                self.store.repoint_bindings(failed_id, &replacement.id),
            )
            .await
        {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(
                        "[KeyRotation] 已将 {} 条绑定从 {} 改为 {}",
                        count,
                        failed_id,
                        replacement.id
                    );
                }
            }
            Err(e) => {
                tracing::warn!("[KeyRotation] 存储中的绑定改指向失败: {}", e);
            }
        }
        self.bindings.repoint(failed_id, &replacement.id);

        // 6. 内存中替换
        if !pool.swap_in(failed_id, replacement.clone()) {
            tracing::debug!(
                "[KeyRotation] {} 不在内存池中，新凭证 {} 已追加",
                failed_id,
                replacement.id
            );
        }

        tracing::info!(
            "[KeyRotation] {} 轮换完成: {} ({}) -> {} ({})，原因: {}",
            provider,
            failed_id,
            failed
                .as_ref()
                .map(|cred| cred.masked_secret())
                .unwrap_or_else(|| "****".to_string()),
            replacement.id,
            mask_secret(&replacement.secret),
            reason
        );
        Ok(Some(replacement))
    }

    /// 领取或插入失败后，把失效记录以耗尽状态放回存储
    async fn restore_as_exhausted(
        &self,
        pool: &CredentialPool,
        failed: Option<&Credential>,
        reason: &RotationReason,
    ) {
        let Some(failed) = failed else {
            return;
        };
        let last_error = Some(format!("rotation failed: {reason}"));
        let mut record = failed.clone();
        record.apply_status(CredentialStatus::Exhausted, None, last_error.clone());

        if let Err(e) = self
            .bounded("insert_credential", self.store.insert_credential(&record))
            .await
        {
            tracing::warn!("[KeyRotation] 放回失效凭证 {} 失败: {}", record.id, e);
        }
        pool.apply_local_status(&record.id, CredentialStatus::Exhausted, last_error);
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("[KeyRotation] {} 超时 ({:?})", op, self.timeout);
                Err(StoreError::Timeout(op.to_string()))
            }
        }
    }
}
