//! Ledger Client
//!
//! Raw HTTP access to the external ledger service. Resilience lives one
//! layer up in [`super::resilient`]; this layer only speaks the wire
//! protocol and classifies failures.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use tracing::{debug, error};

use super::types::{Account, LedgerError, LedgerOutcome, LedgerTransferRequest};
use crate::context::RequestContext;
use crate::transfer::{AccountId, TransferId};

const CORRELATION_HEADER: &str = "X-Correlation-ID";
const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Remote ledger operations
///
/// The ledger deduplicates `apply_transfer` on the idempotency key header,
/// so re-sending after an ambiguous failure is safe.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, LedgerError>;

    async fn apply_transfer(
        &self,
        ctx: &RequestContext,
        transfer_id: TransferId,
        from_account: AccountId,
        to_account: AccountId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<LedgerOutcome, LedgerError>;
}

/// HTTP implementation against the real ledger service
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, LedgerError> {
        let url = format!("{}/accounts/{}", self.base_url, account_id);
        debug!(account_id, correlation_id = %ctx, "Fetching account from ledger");

        let response = self
            .client
            .get(&url)
            .header(CORRELATION_HEADER, ctx.correlation_id())
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(LedgerError::AccountNotFound(account_id)),
            status if status.is_success() => response
                .json::<Account>()
                .await
                .map_err(|e| LedgerError::Unavailable(format!("Malformed account body: {}", e))),
            status => {
                error!(account_id, correlation_id = %ctx, %status, "Ledger account lookup failed");
                Err(LedgerError::Unavailable(format!(
                    "Ledger responded {}",
                    status
                )))
            }
        }
    }

    async fn apply_transfer(
        &self,
        ctx: &RequestContext,
        transfer_id: TransferId,
        from_account: AccountId,
        to_account: AccountId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<LedgerOutcome, LedgerError> {
        let url = format!("{}/ledger/transfer", self.base_url);
        debug!(
            transfer_id = %transfer_id,
            correlation_id = %ctx,
            "Applying transfer at ledger"
        );

        let body = LedgerTransferRequest {
            transfer_id: transfer_id.to_string(),
            from_account_id: from_account,
            to_account_id: to_account,
            amount,
        };

        let response = self
            .client
            .post(&url)
            .header(CORRELATION_HEADER, ctx.correlation_id())
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<LedgerOutcome>()
                .await
                .map_err(|e| LedgerError::Unavailable(format!("Malformed outcome body: {}", e)))
        } else {
            error!(
                transfer_id = %transfer_id,
                correlation_id = %ctx,
                %status,
                "Ledger transfer call failed"
            );
            Err(LedgerError::Unavailable(format!(
                "Ledger responded {}",
                status
            )))
        }
    }
}

/// Scriptable mock for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    pub struct MockLedgerClient {
        accounts: Mutex<HashMap<AccountId, Decimal>>,
        get_account_calls: AtomicUsize,
        apply_calls: AtomicUsize,
        /// All calls transport-fail while set
        unavailable: Mutex<bool>,
        /// Only apply_transfer transport-fails while set
        apply_unavailable: Mutex<bool>,
        /// The next N calls transport-fail, then behavior returns to normal
        fail_next: AtomicUsize,
        /// Business rejection returned from apply_transfer
        reject_apply: Mutex<Option<String>>,
        /// When armed, apply_transfer parks until the gate has a permit
        apply_gate: Mutex<Option<Arc<Semaphore>>>,
    }

    impl MockLedgerClient {
        pub fn new() -> Self {
            Self {
                accounts: Mutex::new(HashMap::new()),
                get_account_calls: AtomicUsize::new(0),
                apply_calls: AtomicUsize::new(0),
                unavailable: Mutex::new(false),
                apply_unavailable: Mutex::new(false),
                fail_next: AtomicUsize::new(0),
                reject_apply: Mutex::new(None),
                apply_gate: Mutex::new(None),
            }
        }

        pub fn with_account(self, id: AccountId, balance: &str) -> Self {
            self.accounts
                .lock()
                .unwrap()
                .insert(id, balance.parse().unwrap());
            self
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            *self.unavailable.lock().unwrap() = unavailable;
        }

        pub fn set_apply_unavailable(&self, unavailable: bool) {
            *self.apply_unavailable.lock().unwrap() = unavailable;
        }

        pub fn fail_next(&self, calls: usize) {
            self.fail_next.store(calls, Ordering::SeqCst);
        }

        /// Park subsequent apply_transfer calls until the returned gate gets
        /// a permit (`add_permits`). Lets a test freeze a transfer mid-flight.
        pub fn gate_applies(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.apply_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        pub fn set_reject_apply(&self, message: Option<&str>) {
            *self.reject_apply.lock().unwrap() = message.map(String::from);
        }

        pub fn get_account_calls(&self) -> usize {
            self.get_account_calls.load(Ordering::SeqCst)
        }

        pub fn apply_calls(&self) -> usize {
            self.apply_calls.load(Ordering::SeqCst)
        }

        fn take_scripted_failure(&self) -> bool {
            if *self.unavailable.lock().unwrap() {
                return true;
            }
            self.fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedgerClient {
        async fn get_account(
            &self,
            _ctx: &RequestContext,
            account_id: AccountId,
        ) -> Result<Account, LedgerError> {
            self.get_account_calls.fetch_add(1, Ordering::SeqCst);

            if self.take_scripted_failure() {
                return Err(LedgerError::Unavailable("Mock transport failure".into()));
            }

            let accounts = self.accounts.lock().unwrap();
            match accounts.get(&account_id) {
                Some(balance) => Ok(Account {
                    id: account_id,
                    balance: *balance,
                }),
                None => Err(LedgerError::AccountNotFound(account_id)),
            }
        }

        async fn apply_transfer(
            &self,
            _ctx: &RequestContext,
            _transfer_id: TransferId,
            from_account: AccountId,
            _to_account: AccountId,
            amount: Decimal,
            _idempotency_key: &str,
        ) -> Result<LedgerOutcome, LedgerError> {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);

            let gate = self.apply_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }

            if *self.apply_unavailable.lock().unwrap() || self.take_scripted_failure() {
                return Err(LedgerError::Unavailable("Mock transport failure".into()));
            }

            if let Some(message) = self.reject_apply.lock().unwrap().clone() {
                return Ok(LedgerOutcome {
                    success: false,
                    message,
                });
            }

            // Debit the mock balance so repeated applies are visible in tests
            let mut accounts = self.accounts.lock().unwrap();
            if let Some(balance) = accounts.get_mut(&from_account) {
                *balance -= amount;
            }

            Ok(LedgerOutcome {
                success: true,
                message: "Transfer completed".to_string(),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_account_lookup() {
            let mock = MockLedgerClient::new().with_account(1, "100.00");
            let ctx = RequestContext::generate();

            let account = mock.get_account(&ctx, 1).await.unwrap();
            assert_eq!(account.balance, "100.00".parse().unwrap());
            assert_eq!(mock.get_account_calls(), 1);

            let missing = mock.get_account(&ctx, 2).await;
            assert!(matches!(missing, Err(LedgerError::AccountNotFound(2))));
        }

        #[tokio::test]
        async fn test_mock_scripted_failures_drain() {
            let mock = MockLedgerClient::new().with_account(1, "100.00");
            let ctx = RequestContext::generate();
            mock.fail_next(2);

            assert!(mock.get_account(&ctx, 1).await.is_err());
            assert!(mock.get_account(&ctx, 1).await.is_err());
            assert!(mock.get_account(&ctx, 1).await.is_ok());
        }
    }
}

#[cfg(test)]
pub use mock::MockLedgerClient;
