//! In-memory data layer.
//!
//! Stands in for the hub's real data module in the demo binary and in tests.
//! Documents get sequential numeric ids, queries match on field equality and
//! updates merge top-level fields.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::hub::data::{DataEnvelope, DataRequest, DataResult, ReadSelector};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: HashMap<String, BTreeMap<u64, Map<String, Value>>>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer data requests until the bus goes away.
    pub async fn serve(mut self, mut requests: mpsc::UnboundedReceiver<DataEnvelope>) {
        while let Some(DataEnvelope { request, reply }) = requests.recv().await {
            tracing::debug!(op = %request.op(), resource = request.resource(), "memory store request");
            let result = self.handle(request);
            reply.send(result);
        }
        tracing::debug!("memory store stopped");
    }

    pub fn handle(&mut self, request: DataRequest) -> DataResult {
        match request {
            DataRequest::Create { resource, body } => {
                let mut doc = expect_object(body, "create")?;
                self.next_id += 1;
                let id = self.next_id;
                doc.insert("id".to_string(), Value::from(id));
                self.collection(&resource).insert(id, doc.clone());
                Ok(Value::Object(doc))
            }
            DataRequest::Read {
                resource,
                selector: ReadSelector::Query(query),
            } => {
                let query = expect_object(query, "query")?;
                let docs = self
                    .collection(&resource)
                    .values()
                    .filter(|doc| query.iter().all(|(k, v)| doc.get(k) == Some(v)))
                    .cloned()
                    .map(Value::Object)
                    .collect();
                Ok(Value::Array(docs))
            }
            DataRequest::Read {
                resource,
                selector: ReadSelector::Id(id),
            } => {
                let key = parse_id(&id)?;
                self.collection(&resource)
                    .get(&key)
                    .cloned()
                    .map(Value::Object)
                    .ok_or_else(not_found)
            }
            DataRequest::Update { resource, id, body } => {
                let key = parse_id(&id)?;
                let changes = expect_object(body, "update")?;
                let doc = self
                    .collection(&resource)
                    .get_mut(&key)
                    .ok_or_else(not_found)?;
                for (k, v) in changes {
                    if k != "id" {
                        doc.insert(k, v);
                    }
                }
                Ok(Value::Object(doc.clone()))
            }
            DataRequest::Delete { resource, id } => {
                let key = parse_id(&id)?;
                self.collection(&resource)
                    .remove(&key)
                    .map(|_| serde_json::json!({ "deleted": key }))
                    .ok_or_else(not_found)
            }
        }
    }

    fn collection(&mut self, name: &str) -> &mut BTreeMap<u64, Map<String, Value>> {
        self.collections.entry(name.to_string()).or_default()
    }
}

fn expect_object(value: Value, what: &str) -> Result<Map<String, Value>, Value> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(Value::from(format!("{} expects a JSON object", what))),
    }
}

fn parse_id(id: &str) -> Result<u64, Value> {
    id.parse().map_err(|_| not_found())
}

fn not_found() -> Value {
    Value::from("not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(store: &mut MemoryStore, body: Value) -> Value {
        store
            .handle(DataRequest::Create {
                resource: "widgets".into(),
                body,
            })
            .unwrap()
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let mut store = MemoryStore::new();
        assert_eq!(create(&mut store, json!({"a": 1})), json!({"a": 1, "id": 1}));
        assert_eq!(create(&mut store, json!({"a": 2})), json!({"a": 2, "id": 2}));
    }

    #[test]
    fn query_matches_fields() {
        let mut store = MemoryStore::new();
        create(&mut store, json!({"color": "red"}));
        create(&mut store, json!({"color": "blue"}));
        let found = store
            .handle(DataRequest::Read {
                resource: "widgets".into(),
                selector: ReadSelector::Query(json!({"color": "blue"})),
            })
            .unwrap();
        assert_eq!(found, json!([{"color": "blue", "id": 2}]));

        let all = store
            .handle(DataRequest::Read {
                resource: "widgets".into(),
                selector: ReadSelector::Query(json!({})),
            })
            .unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);
    }

    #[test]
    fn update_merges_and_delete_removes() {
        let mut store = MemoryStore::new();
        create(&mut store, json!({"a": 1}));
        let updated = store
            .handle(DataRequest::Update {
                resource: "widgets".into(),
                id: "1".into(),
                body: json!({"b": 2, "id": 99}),
            })
            .unwrap();
        assert_eq!(updated, json!({"a": 1, "b": 2, "id": 1}));

        let deleted = store.handle(DataRequest::Delete {
            resource: "widgets".into(),
            id: "1".into(),
        });
        assert_eq!(deleted, Ok(json!({"deleted": 1})));
        let again = store.handle(DataRequest::Delete {
            resource: "widgets".into(),
            id: "1".into(),
        });
        assert_eq!(again, Err(json!("not found")));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let mut store = MemoryStore::new();
        let result = store.handle(DataRequest::Read {
            resource: "widgets".into(),
            selector: ReadSelector::Id("42".into()),
        });
        assert_eq!(result, Err(json!("not found")));
    }
}
