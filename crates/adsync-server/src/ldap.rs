//! ldap3-backed directory connection.

use std::{collections::HashMap, future::Future, time::Duration};

use adsync_core::{
  BackendError,
  backend::{
    AttributeBag, DirectoryEntry, DirectoryResponse, DirectorySearch,
    SearchRequest, SearchScope,
  },
  config::{ControllerConfig, Settings},
};
use adsync_sync::resolver::OBJECT_GUID;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use serde_json::Value;
use uuid::Uuid;

fn directory_error(e: LdapError) -> BackendError {
  BackendError::Directory(e.to_string())
}

/// An authenticated connection to one domain controller.
#[derive(Clone)]
pub struct LdapDirectory {
  ldap: Ldap,
}

impl LdapDirectory {
  /// Bind to the first controller that accepts the connection, in configured
  /// order.
  pub async fn connect(settings: &Settings) -> Result<Self, BackendError> {
    let bind_dn = format!("{}\\{}", settings.ad_domain, settings.ad_user);
    let mut last_error = None;
    for controller in &settings.ad_controllers {
      match Self::connect_one(controller, &bind_dn, &settings.ad_password).await {
        Ok(directory) => return Ok(directory),
        Err(e) => {
          tracing::warn!(url = %controller.url(), error = %e, "controller unavailable");
          last_error = Some(e);
        }
      }
    }
    Err(last_error.unwrap_or_else(|| {
      BackendError::Directory("no domain controllers configured".into())
    }))
  }

  async fn connect_one(
    controller: &ControllerConfig,
    bind_dn: &str,
    password: &str,
  ) -> Result<Self, BackendError> {
    let url = controller.url();
    let conn_settings = LdapConnSettings::new()
      .set_conn_timeout(Duration::from_secs(controller.timeout))
      .set_no_tls_verify(controller.insecure);
    let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &url)
      .await
      .map_err(directory_error)?;
    tokio::spawn(async move {
      if let Err(e) = conn.drive().await {
        tracing::warn!(error = %e, "directory connection closed");
      }
    });

    ldap
      .simple_bind(bind_dn, password)
      .await
      .and_then(|result| result.success())
      .map_err(directory_error)?;
    tracing::info!(%url, "bound to domain controller");
    Ok(Self { ldap })
  }
}

fn scope(scope: SearchScope) -> Scope {
  match scope {
    SearchScope::Base => Scope::Base,
    SearchScope::OneLevel => Scope::OneLevel,
    SearchScope::Subtree => Scope::Subtree,
  }
}

/// A binary GUID in the directory's mixed-endian layout, braced.
fn render_guid(bytes: &[u8]) -> Option<Value> {
  let guid = Uuid::from_slice_le(bytes).ok()?;
  Some(Value::String(format!("{{{guid}}}")))
}

fn render_values(values: Vec<String>) -> Option<Value> {
  match values.len() {
    0 => None,
    1 => values.into_iter().next().map(Value::String),
    _ => Some(Value::Array(values.into_iter().map(Value::String).collect())),
  }
}

/// Turn one search entry into the attribute-bag shape.
///
/// Single values become strings and multiple values become arrays.
/// `objectGUID` is always rendered as a braced GUID string, whichever way the
/// raw bytes were decoded.
pub fn to_directory_entry(
  dn: String,
  attrs: HashMap<String, Vec<String>>,
  bin_attrs: HashMap<String, Vec<Vec<u8>>>,
) -> DirectoryEntry {
  let mut attributes = AttributeBag::new();
  for (name, values) in attrs {
    let value = if name.eq_ignore_ascii_case(OBJECT_GUID) {
      values.first().and_then(|v| render_guid(v.as_bytes()))
    } else {
      render_values(values)
    };
    if let Some(value) = value {
      attributes.insert(name, value);
    }
  }
  for (name, values) in bin_attrs {
    if name.eq_ignore_ascii_case(OBJECT_GUID)
      && let Some(value) = values.first().and_then(|v| render_guid(v))
    {
      attributes.insert(OBJECT_GUID.to_owned(), value);
    }
  }
  DirectoryEntry { dn, attributes }
}

impl DirectorySearch for LdapDirectory {
  fn search(
    &self,
    request: SearchRequest,
  ) -> impl Future<Output = Result<DirectoryResponse, BackendError>> + Send + '_
  {
    async move {
      let mut ldap = self.ldap.clone();
      tracing::debug!(filter = %request.filter, "directory search");
      let (entries, _) = ldap
        .search(
          &request.base,
          scope(request.scope),
          &request.filter,
          request.attributes,
        )
        .await
        .and_then(|result| result.success())
        .map_err(directory_error)?;
      let entries = entries
        .into_iter()
        .map(|entry| {
          let entry = SearchEntry::construct(entry);
          to_directory_entry(entry.dn, entry.attrs, entry.bin_attrs)
        })
        .collect();
      Ok(DirectoryResponse { entries })
    }
  }
}
