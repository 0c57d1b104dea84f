use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{Map, Value};
use url::Url;

use super::store::{StoreError, StorePath, StoreWriter};

/// Writes to a remote tracker server through its `/store` API.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base: Url,
}

impl HttpStore {
    pub fn new(base: Url) -> Self {
        Self {
            client: Client::new(),
            base,
        }
    }

    fn url_for(&self, path: &StorePath) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        if path.is_root() {
            format!("{base}/store")
        } else {
            format!("{base}/store/{path}")
        }
    }
}

async fn check(response: Result<Response, reqwest::Error>) -> Result<(), StoreError> {
    let response = response.map_err(|err| StoreError::Remote(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Remote(format!("{status}: {body}")))
}

#[async_trait]
impl StoreWriter for HttpStore {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let path = StorePath::parse(path)?;
        check(self.client.put(self.url_for(&path)).json(&value).send().await).await
    }

    async fn update(&self, entries: Vec<(String, Option<Value>)>) -> Result<(), StoreError> {
        let mut body = Map::new();
        for (path, value) in entries {
            let path = StorePath::parse(&path)?;
            body.insert(path.to_string(), value.unwrap_or(Value::Null));
        }
        check(
            self.client
                .patch(self.url_for(&StorePath::root()))
                .json(&body)
                .send()
                .await,
        )
        .await
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let path = StorePath::parse(path)?;
        check(self.client.delete(self.url_for(&path)).send().await).await
    }
}
