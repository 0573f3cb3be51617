//! The batch loaders every reconciliation goes through.
//!
//! Each loader wraps one backend call. Keys requested within the same
//! scheduling turn, across all concurrently running reconciliations, are
//! answered by one GraphQL query or one directory search.

use std::{collections::HashMap, sync::Arc, time::Duration};

use adsync_batch::{BatchLoader, BatchOptions, remove_duplicates};
use adsync_core::{
  BackendError,
  backend::{
    AttributeBag, DirectorySearch, GraphqlExecutor, SearchRequest, SearchScope,
    Uploader,
  },
  config::Settings,
  model::{Person, WriteObject},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::resolver::{self, OBJECT_GUID};

// ─── Queries ─────────────────────────────────────────────────────────────────

pub const USERS_QUERY: &str = r#"
query UsersQuery($uuids: [UUID!]) {
  employees(uuids: $uuids) {
    objects {
      uuid
      cpr_no
      itusers {
        itsystem_uuid
        user_key
      }
      addresses {
        uuid
        address_type_uuid
        value
        validity {
          from
          to
        }
      }
    }
  }
}
"#;

pub const ITSYSTEMS_QUERY: &str = r#"
query ITSystemsQuery {
  itsystems {
    uuid
    user_key
  }
}
"#;

pub const CLASSES_QUERY: &str = r#"
query ClassesQuery {
  classes {
    uuid
    user_key
  }
}
"#;

pub const ALL_PERSONS_QUERY: &str = r#"
query EmployeeUUIDQuery {
  employees {
    uuid
  }
}
"#;

#[derive(Deserialize)]
struct Objects<T> {
  objects: Vec<T>,
}

#[derive(Deserialize)]
struct Employees {
  employees: Vec<Objects<Person>>,
}

#[derive(Deserialize)]
struct RegistryEntry {
  uuid:     Uuid,
  user_key: String,
}

#[derive(Deserialize)]
struct PersonRef {
  uuid: Uuid,
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, BackendError> {
  serde_json::from_value(data).map_err(|e| BackendError::Malformed(e.to_string()))
}

// ─── Master-record loads ─────────────────────────────────────────────────────

/// Fetch every requested person in one query.
pub async fn load_users<G: GraphqlExecutor>(
  keys: Vec<Uuid>,
  graphql: &G,
) -> Result<Vec<Option<Person>>, BackendError> {
  let uuids: Vec<String> = remove_duplicates(keys.iter().copied())
    .iter()
    .map(Uuid::to_string)
    .collect();
  let data = graphql.execute(USERS_QUERY, json!({ "uuids": uuids })).await?;
  let response: Employees = parse(data)?;

  let mut users = HashMap::new();
  for employee in response.employees {
    let mut objects = employee.objects.into_iter();
    match (objects.next(), objects.next()) {
      (Some(person), None) => {
        users.insert(person.uuid, person);
      }
      (Some(person), Some(_)) => {
        return Err(BackendError::Malformed(format!(
          "employee {} has more than one current object",
          person.uuid
        )));
      }
      (None, _) => {}
    }
  }
  Ok(keys.iter().map(|key| users.get(key).cloned()).collect())
}

async fn load_registry<G: GraphqlExecutor>(
  keys: Vec<String>,
  graphql: &G,
  query: &str,
  field: &str,
) -> Result<Vec<Option<Uuid>>, BackendError> {
  let mut data = graphql.execute(query, json!({})).await?;
  let entries: Vec<RegistryEntry> =
    parse(data.get_mut(field).map(Value::take).unwrap_or_default())?;
  let registry: HashMap<String, Uuid> = entries
    .into_iter()
    .map(|entry| (entry.user_key, entry.uuid))
    .collect();
  Ok(keys.iter().map(|key| registry.get(key).copied()).collect())
}

/// Resolve linkage-type user keys.
pub async fn load_itsystems<G: GraphqlExecutor>(
  keys: Vec<String>,
  graphql: &G,
) -> Result<Vec<Option<Uuid>>, BackendError> {
  load_registry(keys, graphql, ITSYSTEMS_QUERY, "itsystems").await
}

/// Resolve address-type ("class") user keys.
pub async fn load_classes<G: GraphqlExecutor>(
  keys: Vec<String>,
  graphql: &G,
) -> Result<Vec<Option<Uuid>>, BackendError> {
  load_registry(keys, graphql, CLASSES_QUERY, "classes").await
}

/// Every person in the master-record system. Not batched.
pub async fn load_all_person_uuids<G: GraphqlExecutor>(
  graphql: &G,
) -> Result<Vec<Uuid>, BackendError> {
  let mut data = graphql.execute(ALL_PERSONS_QUERY, json!({})).await?;
  let persons: Vec<PersonRef> =
    parse(data.get_mut("employees").map(Value::take).unwrap_or_default())?;
  Ok(persons.into_iter().map(|person| person.uuid).collect())
}

/// Hand one batch of writes to the bulk uploader.
pub async fn upload_objects<U: Uploader>(
  keys: Vec<WriteObject>,
  uploader: &U,
) -> Result<Vec<Option<Value>>, BackendError> {
  uploader.upload(keys).await
}

// ─── Directory loads ─────────────────────────────────────────────────────────

/// Escape a value for use in an LDAP search filter.
pub fn escape_filter_value(value: &str) -> String {
  let mut escaped = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '\\' => escaped.push_str("\\5c"),
      '*' => escaped.push_str("\\2a"),
      '(' => escaped.push_str("\\28"),
      ')' => escaped.push_str("\\29"),
      '\0' => escaped.push_str("\\00"),
      c => escaped.push(c),
    }
  }
  escaped
}

/// A GUID as the directory stores it: 16 little-endian bytes, each escaped.
pub fn guid_filter_value(guid: Uuid) -> String {
  guid
    .to_bytes_le()
    .iter()
    .map(|byte| format!("\\{byte:02x}"))
    .collect()
}

fn user_filter(conditions: impl IntoIterator<Item = String>) -> String {
  let conditions: String = conditions.into_iter().collect();
  format!("(&(objectclass=user)(|{conditions}))")
}

/// Find the GUIDs of the directory users carrying the given CPR numbers.
pub async fn load_adguids<D: DirectorySearch>(
  keys: Vec<String>,
  directory: &D,
  cpr_attribute: &str,
  search_base: &str,
) -> Result<Vec<Option<Uuid>>, BackendError> {
  let conditions = remove_duplicates(keys.iter().cloned())
    .into_iter()
    .map(|cpr| format!("({cpr_attribute}={})", escape_filter_value(&cpr)));
  let request = SearchRequest {
    base:       search_base.to_owned(),
    filter:     user_filter(conditions),
    scope:      SearchScope::Subtree,
    attributes: vec![cpr_attribute.to_owned(), OBJECT_GUID.to_owned()],
  };
  let response = directory.search(request).await?;
  let guids = resolver::cpr_guid_map(&response, cpr_attribute)?;
  Ok(keys.iter().map(|key| guids.get(key).copied()).collect())
}

/// Fetch the mapped attributes of the directory users with the given GUIDs.
pub async fn load_adattributes<D: DirectorySearch>(
  keys: Vec<Uuid>,
  directory: &D,
  search_base: &str,
  attributes: &[String],
) -> Result<Vec<Option<AttributeBag>>, BackendError> {
  let conditions = remove_duplicates(keys.iter().copied())
    .into_iter()
    .map(|guid| format!("({OBJECT_GUID}={})", guid_filter_value(guid)));
  let request = SearchRequest {
    base:       search_base.to_owned(),
    filter:     user_filter(conditions),
    scope:      SearchScope::Subtree,
    attributes: remove_duplicates(
      std::iter::once(OBJECT_GUID.to_owned()).chain(attributes.iter().cloned()),
    ),
  };
  let response = directory.search(request).await?;
  let bags = resolver::guid_attribute_map(response)?;
  Ok(keys.iter().map(|key| bags.get(key).cloned()).collect())
}

// ─── Wiring ──────────────────────────────────────────────────────────────────

/// The loaders of one running service. Cloning shares the pending queues.
#[derive(Clone)]
pub struct Dataloaders {
  pub users_loader:       BatchLoader<Uuid, Person, BackendError>,
  pub itsystems_loader:   BatchLoader<String, Uuid, BackendError>,
  pub classes_loader:     BatchLoader<String, Uuid, BackendError>,
  /// CPR number → directory GUID.
  pub adguid_loader:      BatchLoader<String, Uuid, BackendError>,
  /// Directory GUID → mapped attributes.
  pub adattribute_loader: BatchLoader<Uuid, AttributeBag, BackendError>,
  pub uploader:           BatchLoader<WriteObject, Value, BackendError>,
}

/// Build the loaders over the given backends.
pub fn configure_dataloaders<G, D, U>(
  settings: &Settings,
  graphql: Arc<G>,
  directory: Arc<D>,
  uploader: Arc<U>,
) -> Dataloaders
where
  G: GraphqlExecutor + 'static,
  D: DirectorySearch + 'static,
  U: Uploader + 'static,
{
  let options = BatchOptions {
    max_batch_size: settings.max_batch_size,
    delay:          settings.batch_delay_ms.map(Duration::from_millis),
  };

  let users_loader = {
    let graphql = Arc::clone(&graphql);
    BatchLoader::with_options(options.clone(), move |keys| {
      let graphql = Arc::clone(&graphql);
      async move { load_users(keys, graphql.as_ref()).await }
    })
  };

  let itsystems_loader = {
    let graphql = Arc::clone(&graphql);
    BatchLoader::with_options(options.clone(), move |keys| {
      let graphql = Arc::clone(&graphql);
      async move { load_itsystems(keys, graphql.as_ref()).await }
    })
  };

  let classes_loader = {
    let graphql = Arc::clone(&graphql);
    BatchLoader::with_options(options.clone(), move |keys| {
      let graphql = Arc::clone(&graphql);
      async move { load_classes(keys, graphql.as_ref()).await }
    })
  };

  let adguid_loader = {
    let directory = Arc::clone(&directory);
    let cpr_attribute: Arc<str> = settings.ad_cpr_attribute.as_str().into();
    let search_base: Arc<str> = settings.ad_search_base.as_str().into();
    BatchLoader::with_options(options.clone(), move |keys| {
      let directory = Arc::clone(&directory);
      let cpr_attribute = Arc::clone(&cpr_attribute);
      let search_base = Arc::clone(&search_base);
      async move {
        load_adguids(keys, directory.as_ref(), &cpr_attribute, &search_base)
          .await
      }
    })
  };

  let adattribute_loader = {
    let search_base: Arc<str> = settings.ad_search_base.as_str().into();
    let attributes: Arc<[String]> = settings.ad_mappings.ad_fields().into();
    BatchLoader::with_options(options.clone(), move |keys| {
      let directory = Arc::clone(&directory);
      let search_base = Arc::clone(&search_base);
      let attributes = Arc::clone(&attributes);
      async move {
        load_adattributes(keys, directory.as_ref(), &search_base, &attributes)
          .await
      }
    })
  };

  let uploader = BatchLoader::with_options(options, move |keys| {
    let uploader = Arc::clone(&uploader);
    async move { upload_objects(keys, uploader.as_ref()).await }
  });

  Dataloaders {
    users_loader,
    itsystems_loader,
    classes_loader,
    adguid_loader,
    adattribute_loader,
    uploader,
  }
}
