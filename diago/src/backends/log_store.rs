//! The log-store surface the core consumes (spec.md §6, §4.9 Non-goals).
//!
//! Recording and retrieving per-request response bodies is explicitly
//! out of scope for this control plane; the trait exists so a caller
//! can wire a real implementation in later without the core changing.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{JobId, TestId, TestInstanceId};
use crate::Error;

/// One recorded HTTP response, as the worker protocol would stream it
/// if response-body logging were enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBlob {
    pub status: u32,
    pub body: Vec<u8>,
    pub timestamp_millis: i64,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn get_test_logs(
        &self,
        test_id: &TestId,
        test_instance_id: &TestInstanceId,
    ) -> Result<HashMap<JobId, Vec<ResponseBlob>>, Error>;
}

/// A `LogStore` that has never recorded anything and never will.
pub struct NullLogStore;

#[async_trait]
impl LogStore for NullLogStore {
    async fn get_test_logs(
        &self,
        test_id: &TestId,
        test_instance_id: &TestInstanceId,
    ) -> Result<HashMap<JobId, Vec<ResponseBlob>>, Error> {
        Err(Error::NotFound(format!(
            "logs for test {test_id} instance {test_instance_id}"
        )))
    }
}
