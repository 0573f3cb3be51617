//! In-memory stand-ins for the master-record system and the directory.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Arc, Mutex},
};

use adsync_core::{
  BackendError,
  backend::{
    DirectoryEntry, DirectoryResponse, DirectorySearch, GraphqlExecutor,
    SearchRequest, Uploader,
  },
  config::{FieldMapping, FieldMappings, Settings},
  model::{Address, ItUser, Person, WriteObject},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
  SyncContext,
  dataloaders::{
    ALL_PERSONS_QUERY, CLASSES_QUERY, ITSYSTEMS_QUERY, USERS_QUERY,
    configure_dataloaders, guid_filter_value,
  },
  resolver::{OBJECT_GUID, parse_guid},
};

pub const CPR_ATTRIBUTE: &str = "extensionAttribute3";
pub const SEARCH_BASE: &str = "OU=Users,DC=Kommune,DC=net";

// ─── Master record ───────────────────────────────────────────────────────────

/// A tiny master-record system. Uploads are applied to `persons`, so a second
/// reconciliation sees the first one's writes.
#[derive(Default)]
pub struct FakeMo {
  persons:      Mutex<HashMap<Uuid, Person>>,
  itsystems:    Vec<(String, Uuid)>,
  classes:      Vec<(String, Uuid)>,
  /// Returned verbatim for every query when set.
  response:     Option<Value>,
  fail_uploads: bool,
  queries:      Mutex<Vec<(String, Value)>>,
  uploads:      Mutex<Vec<Vec<WriteObject>>>,
}

impl FakeMo {
  pub fn with_persons(persons: impl IntoIterator<Item = Person>) -> Self {
    Self {
      persons: Mutex::new(persons.into_iter().map(|p| (p.uuid, p)).collect()),
      ..Self::default()
    }
  }

  pub fn with_itsystem(mut self, user_key: &str, uuid: Uuid) -> Self {
    self.itsystems.push((user_key.to_owned(), uuid));
    self
  }

  pub fn with_class(mut self, user_key: &str, uuid: Uuid) -> Self {
    self.classes.push((user_key.to_owned(), uuid));
    self
  }

  pub fn with_response(mut self, response: Value) -> Self {
    self.response = Some(response);
    self
  }

  pub fn failing_uploads(mut self) -> Self {
    self.fail_uploads = true;
    self
  }

  /// Every query executed so far, with its variables.
  pub fn queries(&self) -> Vec<(String, Value)> {
    self.queries.lock().unwrap().clone()
  }

  pub fn count_queries(&self, query: &str) -> usize {
    self.queries().iter().filter(|(q, _)| q == query).count()
  }

  /// Every upload call so far.
  pub fn uploads(&self) -> Vec<Vec<WriteObject>> {
    self.uploads.lock().unwrap().clone()
  }

  /// Every object written so far, across all upload calls.
  pub fn written(&self) -> Vec<WriteObject> {
    self.uploads().into_iter().flatten().collect()
  }

  pub fn person(&self, uuid: Uuid) -> Option<Person> {
    self.persons.lock().unwrap().get(&uuid).cloned()
  }
}

fn registry(entries: &[(String, Uuid)]) -> Vec<Value> {
  entries
    .iter()
    .map(|(user_key, uuid)| json!({ "uuid": uuid, "user_key": user_key }))
    .collect()
}

impl GraphqlExecutor for FakeMo {
  fn execute<'a>(
    &'a self,
    query: &'a str,
    variables: Value,
  ) -> impl Future<Output = Result<Value, BackendError>> + Send + 'a {
    async move {
      self
        .queries
        .lock()
        .unwrap()
        .push((query.to_owned(), variables.clone()));
      if let Some(response) = &self.response {
        return Ok(response.clone());
      }

      let persons = self.persons.lock().unwrap();
      let data = if query == USERS_QUERY {
        let uuids: Vec<Uuid> =
          serde_json::from_value(variables["uuids"].clone()).unwrap();
        let employees: Vec<Value> = uuids
          .iter()
          .map(|uuid| {
            let objects: Vec<&Person> = persons.get(uuid).into_iter().collect();
            json!({ "objects": objects })
          })
          .collect();
        json!({ "employees": employees })
      } else if query == ALL_PERSONS_QUERY {
        let employees: Vec<Value> =
          persons.keys().map(|uuid| json!({ "uuid": uuid })).collect();
        json!({ "employees": employees })
      } else if query == ITSYSTEMS_QUERY {
        json!({ "itsystems": registry(&self.itsystems) })
      } else if query == CLASSES_QUERY {
        json!({ "classes": registry(&self.classes) })
      } else {
        panic!("unexpected query: {query}");
      };
      Ok(data)
    }
  }
}

fn apply(persons: &mut HashMap<Uuid, Person>, object: WriteObject) -> Value {
  match object {
    WriteObject::ItUser(ituser) => {
      if let Some(person) = persons.get_mut(&ituser.person_uuid) {
        person.itusers.push(ItUser {
          itsystem_uuid: ituser.itsystem_uuid,
          user_key:      ituser.user_key,
        });
      }
      json!({ "uuid": Uuid::new_v4() })
    }
    WriteObject::Address(address) => {
      let Some(person) = persons.get_mut(&address.person_uuid) else {
        return Value::Null;
      };
      let uuid = match address.uuid {
        Some(uuid) => {
          if let Some(existing) =
            person.addresses.iter_mut().find(|a| a.uuid == uuid)
          {
            existing.value = address.value;
            existing.validity = address.validity;
          }
          uuid
        }
        None => {
          let uuid = Uuid::new_v4();
          person.addresses.push(Address {
            uuid,
            address_type_uuid: address.address_type_uuid,
            value: address.value,
            validity: address.validity,
          });
          uuid
        }
      };
      json!({ "uuid": uuid })
    }
  }
}

impl Uploader for FakeMo {
  fn upload(
    &self,
    objects: Vec<WriteObject>,
  ) -> impl Future<Output = Result<Vec<Option<Value>>, BackendError>> + Send + '_
  {
    async move {
      if self.fail_uploads {
        return Err(BackendError::Status {
          status: 500,
          body:   "upload refused".into(),
        });
      }
      self.uploads.lock().unwrap().push(objects.clone());
      let mut persons = self.persons.lock().unwrap();
      Ok(
        objects
          .into_iter()
          .map(|object| Some(apply(&mut persons, object)))
          .collect(),
      )
    }
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Answers a search with every entry whose CPR or GUID condition appears in
/// the filter.
#[derive(Default)]
pub struct FakeDirectory {
  entries:  Mutex<Vec<DirectoryEntry>>,
  searches: Mutex<Vec<SearchRequest>>,
}

impl FakeDirectory {
  pub fn new(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
    Self {
      entries: Mutex::new(entries.into_iter().collect()),
      ..Self::default()
    }
  }

  pub fn searches(&self) -> Vec<SearchRequest> {
    self.searches.lock().unwrap().clone()
  }
}

fn selected_by(entry: &DirectoryEntry, filter: &str) -> bool {
  let cpr = entry
    .attributes
    .get(CPR_ATTRIBUTE)
    .and_then(Value::as_str)
    .map(|cpr| format!("({CPR_ATTRIBUTE}={cpr})"));
  let guid = entry
    .attributes
    .get(OBJECT_GUID)
    .and_then(Value::as_str)
    .and_then(|raw| parse_guid(raw).ok())
    .map(|guid| format!("({OBJECT_GUID}={})", guid_filter_value(guid)));
  [cpr, guid]
    .into_iter()
    .flatten()
    .any(|condition| filter.contains(&condition))
}

impl DirectorySearch for FakeDirectory {
  fn search(
    &self,
    request: SearchRequest,
  ) -> impl Future<Output = Result<DirectoryResponse, BackendError>> + Send + '_
  {
    async move {
      let entries = self
        .entries
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| selected_by(entry, &request.filter))
        .cloned()
        .collect();
      self.searches.lock().unwrap().push(request);
      Ok(DirectoryResponse { entries })
    }
  }
}

// ─── Builders ────────────────────────────────────────────────────────────────

/// A person with a CPR number and nothing else.
pub fn person(cpr_no: &str) -> Person {
  Person {
    uuid:      Uuid::new_v4(),
    cpr_no:    Some(cpr_no.to_owned()),
    itusers:   Vec::new(),
    addresses: Vec::new(),
  }
}

/// A directory user as the directory renders it, with a braced GUID.
pub fn directory_entry(
  guid: Uuid,
  cpr_no: &str,
  attributes: &[(&str, &str)],
) -> DirectoryEntry {
  let mut bag = serde_json::Map::new();
  bag.insert(OBJECT_GUID.into(), format!("{{{guid}}}").into());
  bag.insert(CPR_ATTRIBUTE.into(), cpr_no.into());
  for (name, value) in attributes {
    bag.insert((*name).into(), (*value).into());
  }
  DirectoryEntry {
    dn:         format!("CN={cpr_no},{SEARCH_BASE}"),
    attributes: bag,
  }
}

/// Settings mirroring `mail` and `telephoneNumber` by class user key.
pub fn settings() -> Settings {
  serde_json::from_value(json!({
    "graphql": { "url": "http://mo.test/graphql" },
    "ad_controllers": [{ "host": "dc1.kommune.net" }],
    "ad_domain": "KOMMUNE",
    "ad_password": "secret",
    "ad_cpr_attribute": CPR_ATTRIBUTE,
    "ad_search_base": SEARCH_BASE,
    "ad_mappings": [
      { "ad_field": "mail", "mo_address_type_user_key": "EmailEmployee" },
      { "ad_field": "telephoneNumber", "mo_address_type_user_key": "PhoneEmployee" }
    ]
  }))
  .unwrap()
}

pub fn mappings(mappings: Vec<FieldMapping>) -> FieldMappings {
  FieldMappings::new(mappings).unwrap()
}

/// A context wired to the fakes through the production loaders.
pub struct Harness {
  pub mo:        Arc<FakeMo>,
  pub directory: Arc<FakeDirectory>,
  pub ctx:       SyncContext,
}

pub fn harness(settings: Settings, mo: FakeMo, directory: FakeDirectory) -> Harness {
  let mo = Arc::new(mo);
  let directory = Arc::new(directory);
  let loaders = configure_dataloaders(
    &settings,
    Arc::clone(&mo),
    Arc::clone(&directory),
    Arc::clone(&mo),
  );
  Harness {
    mo,
    directory,
    ctx: SyncContext::new(Arc::new(settings), loaders).unwrap(),
  }
}
