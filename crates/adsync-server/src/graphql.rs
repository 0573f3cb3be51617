//! reqwest-backed GraphQL client for the master-record system.
//!
//! Reads go through [`GraphqlExecutor`]; writes are turned into one mutation
//! per object and run in order through [`Uploader`].

use std::{future::Future, time::Duration};

use adsync_core::{
  BackendError,
  backend::{GraphqlExecutor, Uploader},
  config::GraphqlSettings,
  model::{AddressWrite, ItUserWrite, WriteObject},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const ADDRESS_CREATE: &str = r#"
mutation AddressCreate($input: AddressCreateInput!) {
  address_create(input: $input) {
    uuid
  }
}
"#;

const ADDRESS_UPDATE: &str = r#"
mutation AddressUpdate($input: AddressUpdateInput!) {
  address_update(input: $input) {
    uuid
  }
}
"#;

const ITUSER_CREATE: &str = r#"
mutation ITUserCreate($input: ITUserCreateInput!) {
  ituser_create(input: $input) {
    uuid
  }
}
"#;

#[derive(Deserialize)]
struct GraphqlResponse {
  #[serde(default)]
  data:   Option<Value>,
  #[serde(default)]
  errors: Vec<GraphqlErrorMessage>,
}

#[derive(Deserialize)]
struct GraphqlErrorMessage {
  message: String,
}

/// Async GraphQL client. Cheap to clone.
#[derive(Clone)]
pub struct GraphqlClient {
  client: Client,
  url:    String,
  token:  Option<String>,
}

impl GraphqlClient {
  pub fn new(settings: &GraphqlSettings) -> Result<Self, BackendError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout))
      .build()
      .map_err(|e| BackendError::Transport(Box::new(e)))?;
    Ok(Self {
      client,
      url: settings.url.clone(),
      token: settings.token.clone(),
    })
  }

  async fn post(&self, query: &str, variables: Value) -> Result<Value, BackendError> {
    let mut request = self
      .client
      .post(&self.url)
      .json(&json!({ "query": query, "variables": variables }));
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| BackendError::Transport(Box::new(e)))?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(BackendError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let body: GraphqlResponse = response
      .json()
      .await
      .map_err(|e| BackendError::Malformed(e.to_string()))?;
    if !body.errors.is_empty() {
      return Err(BackendError::Graphql(
        body.errors.into_iter().map(|e| e.message).collect(),
      ));
    }
    body
      .data
      .ok_or_else(|| BackendError::Malformed("response has no data".into()))
  }
}

// ─── Mutations ───────────────────────────────────────────────────────────────

fn address_input(address: &AddressWrite) -> Value {
  let mut input = json!({
    "value": address.value,
    "address_type": address.address_type_uuid,
    "person": address.person_uuid,
    "validity": { "from": address.validity.from, "to": address.validity.to },
  });
  if let Some(uuid) = address.uuid {
    input["uuid"] = json!(uuid);
  }
  input
}

fn ituser_input(ituser: &ItUserWrite) -> Value {
  json!({
    "user_key": ituser.user_key,
    "itsystem": ituser.itsystem_uuid,
    "person": ituser.person_uuid,
    "validity": { "from": ituser.validity.from, "to": ituser.validity.to },
  })
}

/// The mutation, its result field and its input for one write.
fn mutation(object: &WriteObject) -> (&'static str, &'static str, Value) {
  match object {
    WriteObject::Address(address) if address.is_edit() => {
      (ADDRESS_UPDATE, "address_update", address_input(address))
    }
    WriteObject::Address(address) => {
      (ADDRESS_CREATE, "address_create", address_input(address))
    }
    WriteObject::ItUser(ituser) => {
      (ITUSER_CREATE, "ituser_create", ituser_input(ituser))
    }
  }
}

impl GraphqlExecutor for GraphqlClient {
  fn execute<'a>(
    &'a self,
    query: &'a str,
    variables: Value,
  ) -> impl Future<Output = Result<Value, BackendError>> + Send + 'a {
    self.post(query, variables)
  }
}

impl Uploader for GraphqlClient {
  fn upload(
    &self,
    objects: Vec<WriteObject>,
  ) -> impl Future<Output = Result<Vec<Option<Value>>, BackendError>> + Send + '_
  {
    async move {
      let mut responses = Vec::with_capacity(objects.len());
      for object in &objects {
        let (query, field, input) = mutation(object);
        let mut data = self.post(query, json!({ "input": input })).await?;
        let uuid = data
          .get_mut(field)
          .and_then(|result| result.get_mut("uuid"))
          .map(Value::take);
        responses.push(uuid);
      }
      Ok(responses)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use adsync_core::model::Validity;
  use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
  use tokio::net::TcpListener;
  use uuid::Uuid;

  use super::*;

  type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

  /// Serve `reply` for every request on an ephemeral port, recording the
  /// authorization header and body of each request.
  async fn serve(
    reply: fn(&Value) -> (axum::http::StatusCode, Value),
  ) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
      .route(
        "/graphql",
        post(
          move |State(seen): State<Seen>,
                headers: HeaderMap,
                Json(body): Json<Value>| async move {
            let auth = headers
              .get("authorization")
              .and_then(|v| v.to_str().ok())
              .map(str::to_owned);
            let (status, response) = reply(&body);
            seen.lock().unwrap().push((auth, body));
            (status, Json(response))
          },
        ),
      )
      .with_state(Arc::clone(&seen));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{address}/graphql"), seen)
  }

  fn client(url: String, token: Option<&str>) -> GraphqlClient {
    GraphqlClient::new(&GraphqlSettings {
      url,
      token: token.map(str::to_owned),
      timeout: 5,
    })
    .unwrap()
  }

  fn validity() -> Validity {
    Validity {
      from: "2024-03-01".into(),
      to:   Some("2030-12-31".into()),
    }
  }

  #[tokio::test]
  async fn execute_returns_data_and_sends_token() {
    let (url, seen) = serve(|_| {
      (
        axum::http::StatusCode::OK,
        json!({ "data": { "itsystems": [] } }),
      )
    })
    .await;

    let data = client(url, Some("secret"))
      .execute("query { itsystems { uuid } }", json!({}))
      .await
      .unwrap();

    assert_eq!(data, json!({ "itsystems": [] }));
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0.as_deref(), Some("Bearer secret"));
    assert_eq!(seen[0].1["query"], "query { itsystems { uuid } }");
  }

  #[tokio::test]
  async fn graphql_errors_are_reported() {
    let (url, _) = serve(|_| {
      (
        axum::http::StatusCode::OK,
        json!({ "data": null, "errors": [{ "message": "no such field" }] }),
      )
    })
    .await;

    let err = client(url, None).execute("query { nope }", json!({})).await.unwrap_err();
    assert!(matches!(err, BackendError::Graphql(ref m) if m == &["no such field"]));
  }

  #[tokio::test]
  async fn http_failure_is_a_status_error() {
    let (url, _) = serve(|_| {
      (
        axum::http::StatusCode::BAD_GATEWAY,
        json!({ "detail": "upstream down" }),
      )
    })
    .await;

    let err = client(url, None).execute("query { x }", json!({})).await.unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 502, .. }));
  }

  #[tokio::test]
  async fn upload_runs_one_mutation_per_object_in_order() {
    let (url, seen) = serve(|body| {
      let field = if body["query"].as_str().unwrap().contains("address_update") {
        "address_update"
      } else if body["query"].as_str().unwrap().contains("address_create") {
        "address_create"
      } else {
        "ituser_create"
      };
      let uuid = body["variables"]["input"]
        .get("uuid")
        .cloned()
        .unwrap_or_else(|| json!(Uuid::nil()));
      (axum::http::StatusCode::OK, json!({ "data": { field: { "uuid": uuid } } }))
    })
    .await;

    let person = Uuid::new_v4();
    let existing = Uuid::new_v4();
    let objects = vec![
      WriteObject::ItUser(ItUserWrite {
        user_key:      "ccc5f858-5044-4093-a4c2-b2ecb595201e".into(),
        itsystem_uuid: Uuid::new_v4(),
        person_uuid:   person,
        validity:      validity(),
      }),
      WriteObject::Address(AddressWrite {
        uuid:              None,
        address_type_uuid: Uuid::new_v4(),
        value:             "12345678".into(),
        person_uuid:       person,
        validity:          validity(),
      }),
      WriteObject::Address(AddressWrite {
        uuid:              Some(existing),
        address_type_uuid: Uuid::new_v4(),
        value:             "john@kommune.net".into(),
        person_uuid:       person,
        validity:          validity(),
      }),
    ];

    let responses = client(url, None).upload(objects).await.unwrap();

    assert_eq!(responses, vec![
      Some(json!(Uuid::nil())),
      Some(json!(Uuid::nil())),
      Some(json!(existing)),
    ]);
    let seen = seen.lock().unwrap();
    let queries: Vec<&str> =
      seen.iter().map(|(_, b)| b["query"].as_str().unwrap()).collect();
    assert!(queries[0].contains("ituser_create"));
    assert!(queries[1].contains("address_create"));
    assert!(queries[2].contains("address_update"));
    assert_eq!(
      seen[0].1["variables"]["input"]["user_key"],
      "ccc5f858-5044-4093-a4c2-b2ecb595201e"
    );
    assert_eq!(seen[2].1["variables"]["input"]["validity"]["to"], "2030-12-31");
  }
}
