use std::collections::BTreeMap;

use futures_util::future::join_all;
use serde_json::Value;

use crate::{
    cache_key,
    client::{read_arguments, READ_RECORDS_TOOL},
    FilterExpr, ReadOptions, RpcClient, RpcError,
};

/// Field value -> record id, or `None` when no record holds that value.
pub type ExistenceMap = BTreeMap<String, Option<String>>;

impl RpcClient {
    /// Reads through the short-TTL cache. Only successful results are stored.
    #[tracing::instrument(
        name = "ledger_rpc.read_cached",
        skip(self, entity, options, auth_token),
        fields(entity = %entity)
    )]
    pub async fn read_cached(
        &self,
        entity: &str,
        options: &ReadOptions,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        let arguments = read_arguments(entity, options);
        let key = cache_key(READ_RECORDS_TOOL, &arguments, auth_token);
        if let Some(value) = self.cache().get(&key) {
            tracing::debug!("read cache hit");
            return Ok(value);
        }

        let value = self
            .call_tool(READ_RECORDS_TOOL, arguments, auth_token)
            .await?;
        self.cache().insert(key, value.clone());
        Ok(value)
    }

    /// Resolves which `values` of `field` already exist in `entity` with one filtered read
    /// per `existence_batch_size` distinct values. Every distinct input value appears in the
    /// returned map exactly once.
    #[tracing::instrument(
        name = "ledger_rpc.batch_check_existing",
        skip(self, entity, field, values, auth_token),
        fields(entity = %entity, field = %field, value_count = values.len())
    )]
    pub async fn batch_check_existing<S: AsRef<str>>(
        &self,
        entity: &str,
        field: &str,
        values: &[S],
        auth_token: Option<&str>,
    ) -> Result<ExistenceMap, RpcError> {
        let mut existing = ExistenceMap::new();
        let mut distinct = Vec::new();
        let mut occurrences = BTreeMap::<String, usize>::new();
        for value in values {
            let value = value.as_ref();
            *occurrences.entry(value.to_string()).or_default() += 1;
            if !existing.contains_key(value) {
                existing.insert(value.to_string(), None);
                distinct.push(value.to_string());
            }
        }
        if distinct.is_empty() {
            return Ok(existing);
        }

        let id_field = self.config().record_id_field.clone();
        for chunk in distinct.chunks(self.config().existence_batch_size) {
            // Capped at the raw input count the chunk covers, duplicates included.
            let cap = chunk
                .iter()
                .map(|value| occurrences.get(value).copied().unwrap_or(1))
                .sum::<usize>();
            let options = ReadOptions::default()
                .with_filter(FilterExpr::any_eq(field, chunk)?)
                .with_select([id_field.as_str(), field])
                .with_top(cap);
            let rows = self.read_retrying_transport_once(entity, &options, auth_token).await?;

            for record in extract_records(&rows) {
                let (Some(value), Some(id)) =
                    (record_text(record, field), record_text(record, &id_field))
                else {
                    continue;
                };
                match existing.get_mut(&value) {
                    Some(slot) => {
                        if slot.is_none() {
                            *slot = Some(id);
                        }
                    }
                    None => tracing::debug!(value = %value, "ignoring record for unrequested value"),
                }
            }
        }

        let found = existing.values().filter(|id| id.is_some()).count();
        tracing::debug!(found, missing = existing.len() - found, "existence check finished");
        Ok(existing)
    }

    /// Creates `items` in waves of `concurrency`; a wave is fully awaited before the next
    /// starts. Results line up with `items` by index.
    #[tracing::instrument(
        name = "ledger_rpc.create_batch",
        skip(self, entity, items, auth_token),
        fields(entity = %entity, item_count = items.len(), concurrency)
    )]
    pub async fn create_batch(
        &self,
        entity: &str,
        items: &[Value],
        concurrency: usize,
        auth_token: Option<&str>,
    ) -> Vec<Result<Value, RpcError>> {
        let window = concurrency.max(1);
        let mut results = Vec::with_capacity(items.len());
        for (wave, chunk) in items.chunks(window).enumerate() {
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|item| self.create_with_policy(entity, item, auth_token)),
            )
            .await;
            let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
            tracing::debug!(wave, size = chunk.len(), failed, "bulk create wave finished");
            results.extend(outcomes);
        }
        results
    }

    async fn create_with_policy(
        &self,
        entity: &str,
        item: &Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        match self.create(entity, item.clone(), auth_token).await {
            Err(error) if error.is_transport() && self.config().retry_failed_creates_once => {
                tracing::warn!(error = %error, "retrying failed create once");
                self.create(entity, item.clone(), auth_token).await
            }
            outcome => outcome,
        }
    }

    async fn read_retrying_transport_once(
        &self,
        entity: &str,
        options: &ReadOptions,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        match self.read(entity, options, auth_token).await {
            Err(error) if error.is_transport() => {
                tracing::warn!(error = %error, "retrying existence query once");
                self.read(entity, options, auth_token).await
            }
            outcome => outcome,
        }
    }
}

fn extract_records(rows: &Value) -> Vec<&Value> {
    let list = match rows {
        Value::Array(items) => Some(items),
        Value::Object(object) => object
            .get("value")
            .or_else(|| object.get("records"))
            .and_then(Value::as_array),
        _ => None,
    };
    list.map(|items| items.iter().collect()).unwrap_or_default()
}

// Accepts nested paths such as `PrimaryEmailAddr/Address`.
fn lookup_field<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(field) {
        return Some(value);
    }
    field
        .split(['/', '.'])
        .try_fold(record, |current, segment| current.get(segment))
}

fn record_text(record: &Value, field: &str) -> Option<String> {
    match lookup_field(record, field)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
