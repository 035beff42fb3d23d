//! In-process hub for tests: an in-memory state table behind the
//! `HubTransport` seam, with per-method failure injection and a call log.
//!
//! Read methods answer with the same shapes the real hub produces; write
//! methods mutate the table, so applying twice against the mock converges
//! the way it does against a real hub.

use crate::call::{CallDescriptor, CallOutcome};
use crate::transport::HubTransport;
use forgesync_core::{Fault, Result};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Everything the mock hub knows. Exposed for test seeding.
#[derive(Debug, Default)]
pub struct HubState {
    /// `getTag` structs by name.
    pub tags: BTreeMap<String, Value>,
    /// Inheritance rule arrays by tag name.
    pub inheritance: BTreeMap<String, Value>,
    /// External-repo link arrays by tag name.
    pub tag_repos: BTreeMap<String, Vec<Value>>,
    /// Package-group arrays by tag name.
    pub tag_groups: BTreeMap<String, Vec<Value>>,
    pub targets: BTreeMap<String, Value>,
    pub repos: BTreeMap<String, Value>,
    /// Users and groups share the account table, distinguished by `usertype`
    /// (0 = user, 2 = group).
    pub users: BTreeMap<String, Value>,
    pub user_perms: BTreeMap<String, Vec<String>>,
    pub user_groups: BTreeMap<String, Vec<String>>,
    pub group_members: BTreeMap<String, Vec<String>>,
    pub hosts: BTreeMap<String, Value>,
    pub host_channels: BTreeMap<String, Vec<String>>,
    pub channels: BTreeSet<String>,
    pub perms: BTreeSet<String>,
    pub btypes: BTreeSet<String>,
    pub cgs: BTreeMap<String, Vec<String>>,
    pub archive_types: BTreeMap<String, Value>,
}

struct FailRule {
    method: String,
    first_arg: Option<String>,
    fault: Fault,
}

/// Scriptable mock hub.
pub struct MockHub {
    state: Mutex<HubState>,
    fail_rules: Mutex<Vec<FailRule>>,
    calls: Mutex<Vec<CallDescriptor>>,
}

impl MockHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            fail_rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Inspect or seed the state table.
    pub fn state<R>(&self, f: impl FnOnce(&mut HubState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Fail the next matching call. With `first_arg`, only a call whose
    /// first positional argument equals it matches; the rule is consumed.
    pub fn fail_when(&self, method: &str, first_arg: Option<&str>, fault: Fault) {
        self.fail_rules.lock().unwrap().push(FailRule {
            method: method.to_string(),
            first_arg: first_arg.map(String::from),
            fault,
        });
    }

    /// All calls seen so far, in submission order.
    pub fn calls(&self) -> Vec<CallDescriptor> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of all methods called so far (for write-purity assertions).
    pub fn methods_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.method.clone())
            .collect()
    }

    fn take_fail_rule(&self, call: &CallDescriptor) -> Option<Fault> {
        let mut rules = self.fail_rules.lock().unwrap();
        let idx = rules.iter().position(|rule| {
            rule.method == call.method
                && rule
                    .first_arg
                    .as_ref()
                    .map(|want| call.args.first().and_then(Value::as_str) == Some(want))
                    .unwrap_or(true)
        })?;
        Some(rules.remove(idx).fault)
    }

    fn handle(&self, call: &CallDescriptor) -> CallOutcome {
        if let Some(fault) = self.take_fail_rule(call) {
            return Err(fault);
        }

        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        match call.method.as_str() {
            // -- reads ------------------------------------------------------
            "getTag" => Ok(lookup(&state.tags, &arg_str(call, 0)?)),
            "getInheritanceData" => Ok(state
                .inheritance
                .get(&arg_str(call, 0)?)
                .cloned()
                .unwrap_or_else(|| json!([]))),
            "getTagExternalRepos" => Ok(list(&state.tag_repos, &arg_str(call, 0)?)),
            "getTagGroups" => Ok(list(&state.tag_groups, &arg_str(call, 0)?)),
            "getBuildTarget" => Ok(lookup(&state.targets, &arg_str(call, 0)?)),
            "getExternalRepo" => Ok(lookup(&state.repos, &arg_str(call, 0)?)),
            "getUser" => Ok(lookup(&state.users, &arg_str(call, 0)?)),
            "getUserPerms" => Ok(string_list(&state.user_perms, &arg_str(call, 0)?)),
            "getUserGroups" => Ok(name_structs(&state.user_groups, &arg_str(call, 0)?)),
            "getGroupMembers" => Ok(name_structs(&state.group_members, &arg_str(call, 0)?)),
            "getHost" => Ok(lookup(&state.hosts, &arg_str(call, 0)?)),
            "listHostChannels" => Ok(name_structs(&state.host_channels, &arg_str(call, 0)?)),
            "getChannel" => {
                let name = arg_str(call, 0)?;
                Ok(if state.channels.contains(&name) {
                    json!({"name": name})
                } else {
                    Value::Null
                })
            }
            "listChannelHosts" => {
                let channel = arg_str(call, 0)?;
                let hosts: Vec<Value> = state
                    .host_channels
                    .iter()
                    .filter(|(_, channels)| channels.contains(&channel))
                    .map(|(host, _)| json!({"name": host}))
                    .collect();
                Ok(Value::Array(hosts))
            }
            "getAllPerms" => Ok(Value::Array(
                state.perms.iter().map(|p| json!({"name": p})).collect(),
            )),
            "listBTypes" => Ok(Value::Array(
                state.btypes.iter().map(|b| json!({"name": b})).collect(),
            )),
            "listCGs" => {
                let mut map = Map::new();
                for (cg, users) in &state.cgs {
                    map.insert(cg.clone(), json!({ "users": users }));
                }
                Ok(Value::Object(map))
            }
            "getArchiveTypes" => Ok(Value::Array(state.archive_types.values().cloned().collect())),

            // -- tag writes -------------------------------------------------
            "createTag" => {
                let name = arg_str(call, 0)?;
                let mut info = Map::new();
                info.insert("name".into(), json!(name));
                info.insert("arches".into(), kwarg_or(call, "arches", json!("")));
                info.insert("locked".into(), kwarg_or(call, "locked", json!(false)));
                info.insert(
                    "maven_support".into(),
                    kwarg_or(call, "maven_support", json!(false)),
                );
                info.insert("perm".into(), kwarg_or(call, "perm", Value::Null));
                info.insert("extra".into(), kwarg_or(call, "extra", json!({})));
                state.tags.insert(name, Value::Object(info));
                Ok(Value::Null)
            }
            "editTag" => {
                let name = arg_str(call, 0)?;
                let entry = state
                    .tags
                    .get_mut(&name)
                    .ok_or_else(|| Fault::new(1000, format!("no such tag: {}", name)))?;
                if let Value::Object(info) = entry {
                    for (k, v) in &call.kwargs {
                        info.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::Null)
            }
            "setInheritanceData" => {
                let name = arg_str(call, 0)?;
                let rules = call.args.get(1).cloned().unwrap_or_else(|| json!([]));
                state.inheritance.insert(name, rules);
                Ok(Value::Null)
            }
            "addExternalRepoToTag" => {
                let tag = arg_str(call, 0)?;
                let repo = arg_str(call, 1)?;
                let priority = call.args.get(2).cloned().unwrap_or(json!(0));
                state
                    .tag_repos
                    .entry(tag)
                    .or_default()
                    .push(json!({"external_repo_name": repo, "priority": priority}));
                Ok(Value::Null)
            }
            "editTagExternalRepo" => {
                let tag = arg_str(call, 0)?;
                let repo = arg_str(call, 1)?;
                let priority = call.args.get(2).cloned().unwrap_or(json!(0));
                if let Some(links) = state.tag_repos.get_mut(&tag) {
                    for link in links {
                        if link["external_repo_name"].as_str() == Some(repo.as_str()) {
                            link["priority"] = priority.clone();
                        }
                    }
                }
                Ok(Value::Null)
            }
            "removeExternalRepoFromTag" => {
                let tag = arg_str(call, 0)?;
                let repo = arg_str(call, 1)?;
                if let Some(links) = state.tag_repos.get_mut(&tag) {
                    links.retain(|link| link["external_repo_name"].as_str() != Some(repo.as_str()));
                }
                Ok(Value::Null)
            }
            "groupListAdd" => {
                let tag = arg_str(call, 0)?;
                let group = arg_str(call, 1)?;
                let groups = state.tag_groups.entry(tag).or_default();
                if !groups.iter().any(|g| g["name"].as_str() == Some(group.as_str())) {
                    groups.push(json!({"name": group, "packagelist": []}));
                }
                Ok(Value::Null)
            }
            "groupPackageListAdd" => {
                let tag = arg_str(call, 0)?;
                let group = arg_str(call, 1)?;
                let package = arg_str(call, 2)?;
                let groups = state.tag_groups.entry(tag).or_default();
                let entry = groups
                    .iter_mut()
                    .find(|g| g["name"].as_str() == Some(group.as_str()))
                    .ok_or_else(|| Fault::new(1000, format!("no such group: {}", group)))?;
                if let Some(packages) = entry["packagelist"].as_array_mut() {
                    packages.push(json!({"package": package}));
                }
                Ok(Value::Null)
            }

            // -- target / repo writes --------------------------------------
            "createBuildTarget" => {
                let name = arg_str(call, 0)?;
                let build_tag = arg_str(call, 1)?;
                let dest_tag = arg_str(call, 2)?;
                state.targets.insert(
                    name.clone(),
                    json!({"name": name, "build_tag_name": build_tag, "dest_tag_name": dest_tag}),
                );
                Ok(Value::Null)
            }
            "editBuildTarget" => {
                let name = arg_str(call, 0)?;
                let entry = state
                    .targets
                    .get_mut(&name)
                    .ok_or_else(|| Fault::new(1000, format!("no such target: {}", name)))?;
                if let Some(v) = call.kwargs.get("build_tag") {
                    entry["build_tag_name"] = v.clone();
                }
                if let Some(v) = call.kwargs.get("dest_tag") {
                    entry["dest_tag_name"] = v.clone();
                }
                Ok(Value::Null)
            }
            "createExternalRepo" => {
                let name = arg_str(call, 0)?;
                let url = arg_str(call, 1)?;
                state
                    .repos
                    .insert(name.clone(), json!({"name": name, "url": url}));
                Ok(Value::Null)
            }
            "editExternalRepo" => {
                let name = arg_str(call, 0)?;
                let entry = state
                    .repos
                    .get_mut(&name)
                    .ok_or_else(|| Fault::new(1000, format!("no such repo: {}", name)))?;
                if let Some(url) = call.kwargs.get("url") {
                    entry["url"] = url.clone();
                }
                Ok(Value::Null)
            }

            // -- account writes --------------------------------------------
            "createUser" => {
                let name = arg_str(call, 0)?;
                state
                    .users
                    .insert(name.clone(), json!({"name": name, "status": 0, "usertype": 0}));
                Ok(Value::Null)
            }
            "newGroup" => {
                let name = arg_str(call, 0)?;
                state
                    .users
                    .insert(name.clone(), json!({"name": name, "status": 0, "usertype": 2}));
                Ok(Value::Null)
            }
            "enableUser" | "disableUser" => {
                let name = arg_str(call, 0)?;
                let status = if call.method == "enableUser" { 0 } else { 1 };
                let entry = state
                    .users
                    .get_mut(&name)
                    .ok_or_else(|| Fault::new(1000, format!("no such user: {}", name)))?;
                entry["status"] = json!(status);
                Ok(Value::Null)
            }
            "grantPermission" => {
                let user = arg_str(call, 0)?;
                let perm = arg_str(call, 1)?;
                let perms = state.user_perms.entry(user).or_default();
                if !perms.contains(&perm) {
                    perms.push(perm.clone());
                }
                state.perms.insert(perm);
                Ok(Value::Null)
            }
            "revokePermission" => {
                let user = arg_str(call, 0)?;
                let perm = arg_str(call, 1)?;
                if let Some(perms) = state.user_perms.get_mut(&user) {
                    perms.retain(|p| p != &perm);
                }
                Ok(Value::Null)
            }
            "addGroupMember" => {
                let group = arg_str(call, 0)?;
                let user = arg_str(call, 1)?;
                let members = state.group_members.entry(group.clone()).or_default();
                if !members.contains(&user) {
                    members.push(user.clone());
                }
                let groups = state.user_groups.entry(user).or_default();
                if !groups.contains(&group) {
                    groups.push(group);
                }
                Ok(Value::Null)
            }
            "dropGroupMember" => {
                let group = arg_str(call, 0)?;
                let user = arg_str(call, 1)?;
                if let Some(members) = state.group_members.get_mut(&group) {
                    members.retain(|m| m != &user);
                }
                if let Some(groups) = state.user_groups.get_mut(&user) {
                    groups.retain(|g| g != &group);
                }
                Ok(Value::Null)
            }

            // -- host / channel writes -------------------------------------
            "addHost" => {
                let name = arg_str(call, 0)?;
                let arches = call.args.get(1).cloned().unwrap_or(json!([]));
                let arches = arches
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();
                state.hosts.insert(
                    name.clone(),
                    json!({"name": name, "arches": arches, "capacity": 2.0, "enabled": true}),
                );
                Ok(Value::Null)
            }
            "editHost" => {
                let name = arg_str(call, 0)?;
                let entry = state
                    .hosts
                    .get_mut(&name)
                    .ok_or_else(|| Fault::new(1000, format!("no such host: {}", name)))?;
                if let Value::Object(info) = entry {
                    for (k, v) in &call.kwargs {
                        info.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::Null)
            }
            "enableHost" | "disableHost" => {
                let name = arg_str(call, 0)?;
                let enabled = call.method == "enableHost";
                let entry = state
                    .hosts
                    .get_mut(&name)
                    .ok_or_else(|| Fault::new(1000, format!("no such host: {}", name)))?;
                entry["enabled"] = json!(enabled);
                Ok(Value::Null)
            }
            "addHostToChannel" => {
                let host = arg_str(call, 0)?;
                let channel = arg_str(call, 1)?;
                let channels = state.host_channels.entry(host).or_default();
                if !channels.contains(&channel) {
                    channels.push(channel.clone());
                }
                state.channels.insert(channel);
                Ok(Value::Null)
            }
            "removeHostFromChannel" => {
                let host = arg_str(call, 0)?;
                let channel = arg_str(call, 1)?;
                if let Some(channels) = state.host_channels.get_mut(&host) {
                    channels.retain(|c| c != &channel);
                }
                Ok(Value::Null)
            }
            "createChannel" => {
                state.channels.insert(arg_str(call, 0)?);
                Ok(Value::Null)
            }

            // -- administrative writes -------------------------------------
            "createPermission" => {
                state.perms.insert(arg_str(call, 0)?);
                Ok(Value::Null)
            }
            "addBType" => {
                state.btypes.insert(arg_str(call, 0)?);
                Ok(Value::Null)
            }
            "grantCGAccess" => {
                let user = arg_str(call, 0)?;
                let cg = arg_str(call, 1)?;
                let users = state.cgs.entry(cg).or_default();
                if !users.contains(&user) {
                    users.push(user);
                }
                Ok(Value::Null)
            }
            "revokeCGAccess" => {
                let user = arg_str(call, 0)?;
                let cg = arg_str(call, 1)?;
                if let Some(users) = state.cgs.get_mut(&cg) {
                    users.retain(|u| u != &user);
                }
                Ok(Value::Null)
            }
            "addArchiveType" => {
                let name = arg_str(call, 0)?;
                let description = call.args.get(1).cloned().unwrap_or(json!(""));
                let extensions = call.args.get(2).cloned().unwrap_or(json!(""));
                let compression = kwarg_or(call, "compression_type", Value::Null);
                state.archive_types.insert(
                    name.clone(),
                    json!({
                        "name": name,
                        "description": description,
                        "extensions": extensions,
                        "compression_type": compression,
                    }),
                );
                Ok(Value::Null)
            }

            other => Err(Fault::new(-32601, format!("unknown method: {}", other))),
        }
    }
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HubTransport for MockHub {
    async fn multicall(&self, calls: &[CallDescriptor]) -> Result<Vec<CallOutcome>> {
        self.calls.lock().unwrap().extend(calls.iter().cloned());
        Ok(calls.iter().map(|call| self.handle(call)).collect())
    }

    fn endpoint(&self) -> String {
        "mock://hub".into()
    }
}

fn arg_str(call: &CallDescriptor, idx: usize) -> std::result::Result<String, Fault> {
    call.args
        .get(idx)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            Fault::new(
                -32602,
                format!("{}: missing string argument {}", call.method, idx),
            )
        })
}

fn kwarg_or(call: &CallDescriptor, name: &str, default: Value) -> Value {
    call.kwargs.get(name).cloned().unwrap_or(default)
}

fn lookup(map: &BTreeMap<String, Value>, name: &str) -> Value {
    map.get(name).cloned().unwrap_or(Value::Null)
}

fn list(map: &BTreeMap<String, Vec<Value>>, name: &str) -> Value {
    Value::Array(map.get(name).cloned().unwrap_or_default())
}

fn string_list(map: &BTreeMap<String, Vec<String>>, name: &str) -> Value {
    Value::Array(
        map.get(name)
            .map(|items| items.iter().map(|s| json!(s)).collect())
            .unwrap_or_default(),
    )
}

fn name_structs(map: &BTreeMap<String, Vec<String>>, name: &str) -> Value {
    Value::Array(
        map.get(name)
            .map(|items| items.iter().map(|s| json!({"name": s})).collect())
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(hub: &MockHub, c: CallDescriptor) -> CallOutcome {
        hub.handle(&c)
    }

    #[test]
    fn create_then_read_tag() {
        let hub = MockHub::new();
        call(
            &hub,
            CallDescriptor::new("createTag")
                .arg("fedora-42-build")
                .kwarg("arches", "x86_64 aarch64")
                .kwarg("locked", true),
        )
        .unwrap();

        let tag = call(&hub, CallDescriptor::new("getTag").arg("fedora-42-build")).unwrap();
        assert_eq!(tag["arches"], json!("x86_64 aarch64"));
        assert_eq!(tag["locked"], json!(true));
        assert_eq!(tag["extra"], json!({}));
    }

    #[test]
    fn missing_objects_read_as_null() {
        let hub = MockHub::new();
        assert_eq!(
            call(&hub, CallDescriptor::new("getTag").arg("nope")).unwrap(),
            Value::Null
        );
        assert_eq!(
            call(&hub, CallDescriptor::new("getInheritanceData").arg("nope")).unwrap(),
            json!([])
        );
    }

    #[test]
    fn group_membership_stays_in_sync() {
        let hub = MockHub::new();
        call(&hub, CallDescriptor::new("newGroup").arg("releng")).unwrap();
        call(&hub, CallDescriptor::new("createUser").arg("alice")).unwrap();
        call(
            &hub,
            CallDescriptor::new("addGroupMember").arg("releng").arg("alice"),
        )
        .unwrap();

        let members = call(&hub, CallDescriptor::new("getGroupMembers").arg("releng")).unwrap();
        assert_eq!(members[0]["name"], json!("alice"));
        let groups = call(&hub, CallDescriptor::new("getUserGroups").arg("alice")).unwrap();
        assert_eq!(groups[0]["name"], json!("releng"));

        call(
            &hub,
            CallDescriptor::new("dropGroupMember").arg("releng").arg("alice"),
        )
        .unwrap();
        let members = call(&hub, CallDescriptor::new("getGroupMembers").arg("releng")).unwrap();
        assert_eq!(members, json!([]));
    }

    #[test]
    fn fail_rule_matches_first_arg_and_is_consumed() {
        let hub = MockHub::new();
        hub.fail_when("createTag", Some("bad"), Fault::new(1, "injected"));

        assert!(call(&hub, CallDescriptor::new("createTag").arg("good")).is_ok());
        assert_eq!(
            call(&hub, CallDescriptor::new("createTag").arg("bad"))
                .unwrap_err()
                .message,
            "injected"
        );
        // consumed: the same call now succeeds
        assert!(call(&hub, CallDescriptor::new("createTag").arg("bad")).is_ok());
    }
}
