//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::PoisonError;

use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};

use crate::appliance::transport::TransportFuture;
use crate::appliance::{
    ApiRequest, Method, Origin, RawResponse, Transport, TransportError, VolumeKind,
};

/// Pool served by [`FakeAppliance`] unless overridden.
pub const FAKE_POOL: &str = "Pool-0";

const DEFAULT_PAGE_SIZE: usize = 50;
const DEFAULT_AVAILABLE: u64 = 100 * 1024 * 1024 * 1024;
const EPOCH: u64 = 1_700_000_000;
const SHARES_ROOT: &str = "api/v3/shares";
const ZFS_ERROR_CLASS: &str = "zfslib.wrap.zfs.ZfsCmdError";
const NOT_FOUND_CLASS: &str = "opene.exceptions.ItemNotFoundError";

/// Canned answer consumed by the next request that matches it.
#[derive(Clone, Debug)]
struct ScriptedAnswer {
    method: Method,
    path_fragment: String,
    answer: Result<RawResponse, TransportError>,
}

#[derive(Clone, Debug)]
struct FakeSnapshot {
    created: u64,
}

#[derive(Clone, Debug)]
struct FakeVolume {
    kind: VolumeKind,
    size: u64,
    origin: Option<Origin>,
    snapshots: BTreeMap<String, FakeSnapshot>,
}

#[derive(Debug)]
struct FakeState {
    pool: String,
    page_size: usize,
    available: u64,
    clock: u64,
    volumes: BTreeMap<String, FakeVolume>,
    shares: BTreeMap<String, String>,
    requests: Vec<ApiRequest>,
    scripted: VecDeque<ScriptedAnswer>,
}

/// In-memory appliance speaking the management API over the [`Transport`]
/// seam.
///
/// Volumes, snapshots and clones obey the ZFS rules the real appliance
/// enforces: a snapshot with clones cannot be destroyed and a volume with
/// snapshots cannot be destroyed. Zvols and NAS volumes share one dataset
/// namespace but are only visible through their own collection. Failures
/// are reported with the appliance's errno and prose so they exercise the
/// real classifier.
#[derive(Debug)]
pub struct FakeAppliance {
    state: std::sync::Mutex<FakeState>,
}

impl Default for FakeAppliance {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an appliance error response.
#[must_use]
pub fn appliance_error(status: u16, errno: Option<i64>, message: &str) -> RawResponse {
    classed_error(status, errno, ZFS_ERROR_CLASS, message)
}

fn classed_error(status: u16, errno: Option<i64>, class: &str, message: &str) -> RawResponse {
    RawResponse::json(
        status,
        &json!({
            "data": null,
            "error": {
                "errno": errno,
                "class": class,
                "message": message,
                "url": null
            }
        }),
    )
}

fn no_content() -> RawResponse {
    RawResponse {
        status: 204,
        body: Vec::new(),
    }
}

fn collection_kind(segment: &str) -> Option<VolumeKind> {
    [VolumeKind::Block, VolumeKind::File]
        .into_iter()
        .find(|kind| kind.collection() == segment)
}

fn answer(status: u16, data: Value) -> RawResponse {
    RawResponse::json(status, &json!({ "data": data, "error": null }))
}

fn query_value(query: &str, key: &str) -> i64 {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == key)
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or_default()
}

fn body_str<'r>(request: &'r ApiRequest, field: &str) -> Option<&'r str> {
    request
        .body
        .as_ref()
        .and_then(|body| body.get(field))
        .and_then(Value::as_str)
}

impl FakeAppliance {
    /// Creates an empty appliance serving [`FAKE_POOL`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(FakeState {
                pool: FAKE_POOL.to_owned(),
                page_size: DEFAULT_PAGE_SIZE,
                available: DEFAULT_AVAILABLE,
                clock: 0,
                volumes: BTreeMap::new(),
                shares: BTreeMap::new(),
                requests: Vec::new(),
                scripted: VecDeque::new(),
            }),
        }
    }

    /// Sets how many rows each listing page carries.
    #[must_use]
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.set_page_size(page_size);
        self
    }

    /// Changes how many rows each listing page carries from now on.
    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size.max(1);
    }

    /// Sets the free space reported for the pool.
    #[must_use]
    pub fn with_available(self, available: u64) -> Self {
        self.state().available = available;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a plain zvol.
    pub fn add_volume(&self, name: &str, size: u64) {
        self.add_volume_of_kind(name, size, VolumeKind::Block);
    }

    /// Seeds a plain NAS volume with a `size` byte quota.
    pub fn add_nas_volume(&self, name: &str, size: u64) {
        self.add_volume_of_kind(name, size, VolumeKind::File);
    }

    fn add_volume_of_kind(&self, name: &str, size: u64, kind: VolumeKind) {
        self.state().volumes.insert(
            name.to_owned(),
            FakeVolume {
                kind,
                size,
                origin: None,
                snapshots: BTreeMap::new(),
            },
        );
    }

    /// Seeds a snapshot on an existing volume. Returns `false` when the
    /// volume is missing.
    #[must_use = "seeding fails silently when the volume is missing"]
    pub fn add_snapshot(&self, volume: &str, snapshot: &str) -> bool {
        let mut state = self.state();
        state.clock = state.clock.saturating_add(1);
        let created = state.clock;
        let Some(owner) = state.volumes.get_mut(volume) else {
            return false;
        };
        owner
            .snapshots
            .insert(snapshot.to_owned(), FakeSnapshot { created });
        true
    }

    /// Seeds a clone of `volume@snapshot`. Returns `false` when the origin is
    /// missing.
    #[must_use = "seeding fails silently when the origin is missing"]
    pub fn add_clone(&self, volume: &str, snapshot: &str, clone: &str) -> bool {
        let mut state = self.state();
        let Some((kind, size)) = state
            .volumes
            .get(volume)
            .filter(|owner| owner.snapshots.contains_key(snapshot))
            .map(|owner| (owner.kind, owner.size))
        else {
            return false;
        };
        state.volumes.insert(
            clone.to_owned(),
            FakeVolume {
                kind,
                size,
                origin: Some(Origin {
                    volume: volume.to_owned(),
                    snapshot: snapshot.to_owned(),
                }),
                snapshots: BTreeMap::new(),
            },
        );
        true
    }

    /// Returns `true` when the volume exists.
    #[must_use]
    pub fn has_volume(&self, name: &str) -> bool {
        self.state().volumes.contains_key(name)
    }

    /// Size of a volume in bytes.
    #[must_use]
    pub fn volume_size(&self, name: &str) -> Option<u64> {
        self.state().volumes.get(name).map(|volume| volume.size)
    }

    /// Kind of a volume.
    #[must_use]
    pub fn volume_kind(&self, name: &str) -> Option<VolumeKind> {
        self.state().volumes.get(name).map(|volume| volume.kind)
    }

    /// Names of every NFS share, sorted.
    #[must_use]
    pub fn share_names(&self) -> Vec<String> {
        self.state().shares.keys().cloned().collect()
    }

    /// Dataset path exported by a share.
    #[must_use]
    pub fn share_path(&self, name: &str) -> Option<String> {
        self.state().shares.get(name).cloned()
    }

    /// Names of every volume, sorted.
    #[must_use]
    pub fn volume_names(&self) -> Vec<String> {
        self.state().volumes.keys().cloned().collect()
    }

    /// Names of the snapshots on `volume`, sorted.
    #[must_use]
    pub fn snapshot_names(&self, volume: &str) -> Vec<String> {
        self.state()
            .volumes
            .get(volume)
            .map(|owner| owner.snapshots.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Volumes cloned from `volume@snapshot`.
    #[must_use]
    pub fn clones_of(&self, volume: &str, snapshot: &str) -> Vec<String> {
        self.state().clones_of(volume, snapshot)
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state().requests.clone()
    }

    /// Forgets the recorded requests.
    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Makes the next request with `method` whose path contains
    /// `path_fragment` receive `answer` instead of being served.
    pub fn fail_next(
        &self,
        method: Method,
        path_fragment: &str,
        answer: Result<RawResponse, TransportError>,
    ) {
        self.state().scripted.push_back(ScriptedAnswer {
            method,
            path_fragment: path_fragment.to_owned(),
            answer,
        });
    }
}

impl Transport for FakeAppliance {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a> {
        let result = {
            let mut state = self.state();
            state.requests.push(request.clone());
            let scripted = state.scripted.iter().position(|candidate| {
                candidate.method == request.method
                    && request.path.contains(&candidate.path_fragment)
            });
            match scripted.and_then(|index| state.scripted.remove(index)) {
                Some(scripted) => scripted.answer,
                None => Ok(state.serve(request)),
            }
        };
        Box::pin(async move { result })
    }
}

impl FakeState {
    fn dataset(&self, name: &str) -> String {
        format!("{}/{name}", self.pool)
    }

    fn missing(&self, name: &str) -> RawResponse {
        appliance_error(
            500,
            Some(1),
            &format!(
                "Zfs resource: {} not found in this collection.",
                self.dataset(name)
            ),
        )
    }

    fn volume(&self, kind: VolumeKind, name: &str) -> Option<&FakeVolume> {
        self.volumes.get(name).filter(|found| found.kind == kind)
    }

    fn exists(&self, name: &str) -> RawResponse {
        appliance_error(
            500,
            Some(5),
            &format!("Resource {} already exists.", self.dataset(name)),
        )
    }

    fn clones_of(&self, volume: &str, snapshot: &str) -> Vec<String> {
        self.volumes
            .iter()
            .filter(|(_, candidate)| {
                candidate
                    .origin
                    .as_ref()
                    .is_some_and(|origin| origin.volume == volume && origin.snapshot == snapshot)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn page<T: Clone>(&self, rows: &[T], query: &str) -> Vec<T> {
        let page = usize::try_from(query_value(query, "page")).unwrap_or_default();
        rows.iter()
            .skip(page.saturating_mul(self.page_size))
            .take(self.page_size)
            .cloned()
            .collect()
    }

    fn listing(rows: Vec<Value>) -> RawResponse {
        answer(200, json!({ "results": rows.len(), "entries": rows }))
    }

    fn volume_json(&self, name: &str, volume: &FakeVolume) -> Value {
        let origin = volume.origin.as_ref().map_or_else(String::new, |origin| {
            format!("{}@{}", self.dataset(&origin.volume), origin.snapshot)
        });
        let size_field = match volume.kind {
            VolumeKind::Block => "volsize",
            VolumeKind::File => "quota",
        };
        json!({
            "name": name,
            size_field: volume.size.to_string(),
            "origin": origin,
            "is_clone": volume.origin.is_some()
        })
    }

    fn snapshot_json(&self, volume: &str, name: &str, snapshot: &FakeSnapshot) -> Value {
        let clones = self
            .clones_of(volume, name)
            .iter()
            .map(|clone| self.dataset(clone))
            .collect::<Vec<_>>()
            .join(",");
        let mut row = json!({
            "name": name,
            "creation": EPOCH.saturating_add(snapshot.created).to_string(),
            "clones": clones
        });
        // NAS snapshots carry no size.
        if let Some(owner) = self.volume(VolumeKind::Block, volume) {
            row["volsize"] = Value::String(owner.size.to_string());
        }
        row
    }

    fn serve(&mut self, request: &ApiRequest) -> RawResponse {
        let (path, query) = request
            .path
            .split_once('?')
            .unwrap_or((request.path.as_str(), ""));
        if let Some(rest) = path.strip_prefix(SHARES_ROOT) {
            return self.serve_shares(request, rest.trim_start_matches('/'));
        }
        let root = format!("api/v3/pools/{}", self.pool);
        let Some(rest) = path.strip_prefix(&root) else {
            return appliance_error(
                404,
                None,
                &format!("Pool {} not found.", path.trim_start_matches("api/v3/pools/")),
            );
        };
        let segments: Vec<&str> = rest.split('/').filter(|part| !part.is_empty()).collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, []) => answer(
                200,
                json!({ "name": self.pool, "available": self.available.to_string() }),
            ),
            (_, [collection, rest @ ..]) => match collection_kind(collection) {
                Some(kind) => self.serve_collection(kind, request, rest, query),
                None => Self::no_route(request),
            },
            _ => Self::no_route(request),
        }
    }

    fn no_route(request: &ApiRequest) -> RawResponse {
        appliance_error(
            404,
            None,
            &format!("No route for {} {}", request.method, request.path),
        )
    }

    fn serve_collection(
        &mut self,
        kind: VolumeKind,
        request: &ApiRequest,
        segments: &[&str],
        query: &str,
    ) -> RawResponse {
        match (request.method, kind, segments) {
            (Method::Get, _, []) => self.list_volumes(kind, query),
            (Method::Post, _, []) => self.create_volume(kind, request),
            (Method::Get, _, ["snapshots"]) => self.list_pool_snapshots(kind, query),
            (Method::Get, _, [volume]) => self.get_volume(kind, volume),
            (Method::Delete, _, [volume]) => self.delete_volume(kind, volume),
            (Method::Post, _, [volume, "snapshots"]) => {
                self.create_snapshot(kind, volume, request)
            }
            (Method::Get, _, [volume, "snapshots"]) => {
                self.list_volume_snapshots(kind, volume, query)
            }
            (Method::Get, _, [volume, "snapshots", snapshot]) => {
                self.get_snapshot(kind, volume, snapshot)
            }
            (Method::Delete, _, [volume, "snapshots", snapshot]) => {
                self.delete_snapshot(kind, volume, snapshot)
            }
            (Method::Post, VolumeKind::Block, [volume, "clone"]) => {
                match body_str(request, "snapshot") {
                    Some(snapshot) => self.create_clone(kind, volume, snapshot, request),
                    None => appliance_error(400, None, "Invalid clone request body."),
                }
            }
            (Method::Post, VolumeKind::File, [volume, "snapshots", snapshot, "clones"]) => {
                self.create_clone(kind, volume, snapshot, request)
            }
            _ => Self::no_route(request),
        }
    }

    fn serve_shares(&mut self, request: &ApiRequest, rest: &str) -> RawResponse {
        match (request.method, rest) {
            (Method::Post, "") => self.create_share(request),
            (Method::Delete, name) if !name.is_empty() => {
                if self.shares.remove(name).is_some() {
                    no_content()
                } else {
                    let message = format!("Share {name} not found.");
                    classed_error(404, None, NOT_FOUND_CLASS, &message)
                }
            }
            _ => Self::no_route(request),
        }
    }

    fn create_share(&mut self, request: &ApiRequest) -> RawResponse {
        let (Some(name), Some(path)) = (body_str(request, "name"), body_str(request, "path"))
        else {
            return appliance_error(400, None, "Invalid share request body.");
        };
        let exported = path.split('/').nth(1).unwrap_or_default();
        if self.volume(VolumeKind::File, exported).is_none() {
            return self.missing(exported);
        }
        if self.shares.contains_key(name) {
            return self.exists(name);
        }
        self.shares.insert(name.to_owned(), path.to_owned());
        answer(201, json!({ "name": name, "path": path }))
    }

    fn list_volumes(&self, kind: VolumeKind, query: &str) -> RawResponse {
        let rows: Vec<Value> = self
            .volumes
            .iter()
            .filter(|(_, volume)| volume.kind == kind)
            .map(|(name, volume)| self.volume_json(name, volume))
            .collect();
        Self::listing(self.page(&rows, query))
    }

    fn list_pool_snapshots(&self, kind: VolumeKind, query: &str) -> RawResponse {
        let rows: Vec<Value> = self
            .volumes
            .iter()
            .filter(|(_, owner)| owner.kind == kind)
            .flat_map(|(volume, owner)| {
                owner.snapshots.iter().map(move |(name, snapshot)| {
                    json!({
                        "volume": volume,
                        "name": name,
                        "properties": {
                            "creation": EPOCH.saturating_add(snapshot.created).to_string()
                        }
                    })
                })
            })
            .collect();
        Self::listing(self.page(&rows, query))
    }

    fn list_volume_snapshots(&self, kind: VolumeKind, volume: &str, query: &str) -> RawResponse {
        let Some(owner) = self.volume(kind, volume) else {
            return self.missing(volume);
        };
        let rows: Vec<Value> = owner
            .snapshots
            .iter()
            .map(|(name, snapshot)| self.snapshot_json(volume, name, snapshot))
            .collect();
        Self::listing(self.page(&rows, query))
    }

    fn get_volume(&self, kind: VolumeKind, volume: &str) -> RawResponse {
        self.volume(kind, volume).map_or_else(
            || self.missing(volume),
            |found| answer(200, self.volume_json(volume, found)),
        )
    }

    fn create_volume(&mut self, kind: VolumeKind, request: &ApiRequest) -> RawResponse {
        let size_field = match kind {
            VolumeKind::Block => "size",
            VolumeKind::File => "quota",
        };
        let (Some(name), Some(size)) = (
            body_str(request, "name"),
            body_str(request, size_field).and_then(|size| size.parse::<u64>().ok()),
        ) else {
            return appliance_error(400, None, "Invalid volume request body.");
        };
        if self.volumes.contains_key(name) {
            return self.exists(name);
        }
        if size > self.available {
            return appliance_error(
                500,
                None,
                &format!(
                    "New zvol size({size}) exceeds available space on pool {}({}).",
                    self.pool, self.available
                ),
            );
        }
        self.volumes.insert(
            name.to_owned(),
            FakeVolume {
                kind,
                size,
                origin: None,
                snapshots: BTreeMap::new(),
            },
        );
        answer(201, json!({ "name": name, size_field: size.to_string() }))
    }

    fn delete_volume(&mut self, kind: VolumeKind, volume: &str) -> RawResponse {
        let Some(found) = self.volume(kind, volume) else {
            return self.missing(volume);
        };
        if !found.snapshots.is_empty() {
            let children = found
                .snapshots
                .keys()
                .map(|snapshot| format!("{}@{snapshot}", self.dataset(volume)))
                .collect::<Vec<_>>()
                .join("\n");
            return appliance_error(
                500,
                Some(1000),
                &format!(
                    "cannot destroy '{}': volume has children\nuse '-r' to destroy the following datasets:\n{children}",
                    self.dataset(volume)
                ),
            );
        }
        self.volumes.remove(volume);
        no_content()
    }

    fn create_snapshot(
        &mut self,
        kind: VolumeKind,
        volume: &str,
        request: &ApiRequest,
    ) -> RawResponse {
        let name_field = match kind {
            VolumeKind::Block => "snapshot_name",
            VolumeKind::File => "name",
        };
        let Some(name) = body_str(request, name_field) else {
            return appliance_error(400, None, "Invalid snapshot request body.");
        };
        let dataset = self.dataset(volume);
        self.clock = self.clock.saturating_add(1);
        let created = self.clock;
        let owner = self.volumes.get_mut(volume);
        let Some(owner) = owner.filter(|found| found.kind == kind) else {
            return self.missing(volume);
        };
        if owner.snapshots.contains_key(name) {
            return appliance_error(
                500,
                Some(100),
                &format!("cannot create '{dataset}@{name}': dataset already exists"),
            );
        }
        owner
            .snapshots
            .insert(name.to_owned(), FakeSnapshot { created });
        answer(201, json!({ "name": name }))
    }

    fn get_snapshot(&self, kind: VolumeKind, volume: &str, snapshot: &str) -> RawResponse {
        let Some(owner) = self.volume(kind, volume) else {
            return self.missing(volume);
        };
        owner.snapshots.get(snapshot).map_or_else(
            || self.missing(&format!("{volume}@{snapshot}")),
            |found| answer(200, self.snapshot_json(volume, snapshot, found)),
        )
    }

    fn delete_snapshot(&mut self, kind: VolumeKind, volume: &str, snapshot: &str) -> RawResponse {
        let dataset = format!("{}@{snapshot}", self.dataset(volume));
        let exists = self
            .volume(kind, volume)
            .is_some_and(|owner| owner.snapshots.contains_key(snapshot));
        if !exists {
            return appliance_error(
                500,
                Some(0),
                &format!("cannot open '{dataset}': dataset does not exist"),
            );
        }
        let clones = self.clones_of(volume, snapshot);
        if !clones.is_empty() {
            let dependents = clones
                .iter()
                .map(|clone| self.dataset(clone))
                .collect::<Vec<_>>()
                .join("\n");
            return appliance_error(
                500,
                Some(1000),
                &format!(
                    "cannot destroy '{dataset}': snapshot has dependent clones\nuse '-R' to destroy the following datasets:\n{dependents}"
                ),
            );
        }
        if let Some(owner) = self.volumes.get_mut(volume) {
            owner.snapshots.remove(snapshot);
        }
        no_content()
    }

    fn create_clone(
        &mut self,
        kind: VolumeKind,
        volume: &str,
        snapshot: &str,
        request: &ApiRequest,
    ) -> RawResponse {
        let Some(name) = body_str(request, "name") else {
            return appliance_error(400, None, "Invalid clone request body.");
        };
        let Some(owner) = self.volume(kind, volume) else {
            return self.missing(volume);
        };
        if !owner.snapshots.contains_key(snapshot) {
            return self.missing(&format!("{volume}@{snapshot}"));
        }
        if self.volumes.contains_key(name) {
            return appliance_error(
                500,
                Some(100),
                &format!("cannot create '{}': dataset already exists", self.dataset(name)),
            );
        }
        let size = owner.size;
        self.volumes.insert(
            name.to_owned(),
            FakeVolume {
                kind,
                size,
                origin: Some(Origin {
                    volume: volume.to_owned(),
                    snapshot: snapshot.to_owned(),
                }),
                snapshots: BTreeMap::new(),
            },
        );
        answer(201, json!({ "name": name }))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
