//! End-to-end reconciliation scenarios against a scripted provider.

use reconciler::{
    Applied, Attrs, CancelToken, Declaration, Error, ExecuteOptions, FailureMode, LifecycleState,
    MemoryStateStore, OutputBinding, Provider, ResourceAction, ResourceId, Result, RetryConfig,
    SchemaRegistry, StateStore, TypeSchema, Value,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Scripted in-memory provider. Resources are identified by their
/// `name` attribute for failure injection and call assertions.
#[derive(Default)]
struct TestProvider {
    /// Operation log: `"create vpc-name"`, `"delete cluster-name"`, ...
    calls: Mutex<Vec<String>>,
    /// Names whose create/update fails permanently
    fail_permanent: Vec<String>,
    /// Names failing transiently: remaining failure count
    fail_transient: Mutex<HashMap<String, u32>>,
    counter: AtomicU64,
}

impl TestProvider {
    fn name_of(attrs: &Attrs) -> String {
        attrs
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("anonymous")
            .to_string()
    }

    fn check_failures(&self, name: &str) -> Result<()> {
        if self.fail_permanent.iter().any(|n| n == name) {
            return Err(Error::permanent(format!("{name}: invalid attribute")));
        }
        let mut transient = self.fail_transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::transient(format!("{name}: rate limited")));
        }
        Ok(())
    }

    fn log(&self, op: &str, subject: &str) {
        self.calls.lock().unwrap().push(format!("{op} {subject}"));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Provider for TestProvider {
    fn create(&self, kind: &str, attrs: &Attrs) -> Result<Applied> {
        let name = Self::name_of(attrs);
        self.check_failures(&name)?;
        self.log("create", &name);

        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let provider_id = format!("{kind}-{serial}");
        let mut outputs = attrs.clone();
        outputs.insert("id".into(), Value::String(provider_id.clone()));
        Ok(Applied {
            provider_id,
            outputs,
        })
    }

    fn update(&self, _kind: &str, provider_id: &str, attrs: &Attrs) -> Result<Applied> {
        let name = Self::name_of(attrs);
        self.check_failures(&name)?;
        self.log("update", &name);

        let mut outputs = attrs.clone();
        outputs.insert("id".into(), Value::String(provider_id.to_string()));
        Ok(Applied {
            provider_id: provider_id.to_string(),
            outputs,
        })
    }

    fn delete(&self, _kind: &str, provider_id: &str) -> Result<()> {
        self.log("delete", provider_id);
        Ok(())
    }

    fn read(&self, _kind: &str, provider_id: &str) -> Result<Option<Applied>> {
        Ok(Some(Applied {
            provider_id: provider_id.to_string(),
            outputs: Attrs::new(),
        }))
    }
}

fn id(kind: &str, name: &str) -> ResourceId {
    ResourceId::new(kind, name)
}

fn attrs(pairs: &[(&str, &str)]) -> Attrs {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .register("cluster", TypeSchema::new().mutable(["version"]))
        .register("node_pool", TypeSchema::new().mutable(["count"]))
}

fn fast_options() -> ExecuteOptions {
    ExecuteOptions {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

/// Network, cluster depending on it, and an independent registry.
fn network_cluster_registry() -> Vec<Declaration> {
    let mut cluster = attrs(&[("name", "k8s"), ("version", "1.21")]);
    cluster.insert(
        "vpc_id".into(),
        Value::Ref(OutputBinding::new(id("vpc", "net"), "id")),
    );
    vec![
        Declaration::new("vpc", "net", attrs(&[("name", "net"), ("region", "ams3")])),
        Declaration::new("cluster", "k8s", cluster),
        Declaration::new("registry", "hub", attrs(&[("name", "hub"), ("tier", "basic")])),
    ]
}

#[test]
fn scenario_network_cluster_registry_converges() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    let preview = reconciler::plan(network_cluster_registry(), &store, &schemas()).unwrap();
    // Roots (the network and the independent registry) share the first
    // batch; the cluster waits for its network
    assert_eq!(
        preview.schedule.batches,
        vec![
            vec![id("registry", "hub"), id("vpc", "net")],
            vec![id("cluster", "k8s")],
        ]
    );

    let report = reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    assert!(report.is_success());
    for outcome in &report.outcomes {
        assert_eq!(outcome.state, LifecycleState::Ready);
        assert_eq!(outcome.action, ResourceAction::Create);
    }

    // The cluster saw the network's assigned id, not the binding
    let record = store.load(&id("cluster", "k8s")).unwrap().unwrap();
    match &record.attrs["vpc_id"] {
        Value::String(s) => assert!(s.starts_with("vpc-"), "unresolved vpc_id: {s}"),
        other => panic!("binding not resolved: {other:?}"),
    }

    // Happens-before within the chain: network created before cluster
    let calls = provider.calls();
    let net = calls.iter().position(|c| c == "create net").unwrap();
    let k8s = calls.iter().position(|c| c == "create k8s").unwrap();
    assert!(net < k8s);
}

#[test]
fn scenario_second_apply_is_idempotent() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    let first_calls = provider.calls().len();

    let report = reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();

    assert!(report.is_success());
    for outcome in &report.outcomes {
        assert_eq!(outcome.action, ResourceAction::NoOp, "{} changed", outcome.id);
        assert_eq!(outcome.attempts, 0);
    }
    assert_eq!(provider.calls().len(), first_calls);
}

#[test]
fn scenario_replacement_ripples_downstream() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    let old_vpc_id = store.load(&id("vpc", "net")).unwrap().unwrap().provider_id;

    // Move the network to another region: replacement-triggering
    let mut declarations = network_cluster_registry();
    declarations[0] = Declaration::new("vpc", "net", attrs(&[("name", "net"), ("region", "nyc1")]));

    let report = reconciler::apply(
        declarations,
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    assert!(report.is_success());

    let vpc = report.outcome(&id("vpc", "net")).unwrap();
    assert_eq!(vpc.action, ResourceAction::Replace);

    // The cluster was re-evaluated because its vpc_id binding changed
    let cluster = report.outcome(&id("cluster", "k8s")).unwrap();
    assert!(cluster.action.is_change());

    // The registry subgraph was untouched
    let registry = report.outcome(&id("registry", "hub")).unwrap();
    assert_eq!(registry.action, ResourceAction::NoOp);

    // Create-before-delete: the replacement exists before the old id dies
    let calls = provider.calls();
    let recreate = calls.iter().rposition(|c| c == "create net").unwrap();
    let delete_old = calls
        .iter()
        .position(|c| *c == format!("delete {old_vpc_id}"))
        .unwrap();
    assert!(recreate < delete_old);

    let new_vpc_id = store.load(&id("vpc", "net")).unwrap().unwrap().provider_id;
    assert_ne!(new_vpc_id, old_vpc_id);
    let cluster_record = store.load(&id("cluster", "k8s")).unwrap().unwrap();
    assert_eq!(cluster_record.attrs["vpc_id"], Value::String(new_vpc_id));
}

#[test]
fn scenario_old_instance_outlives_dependent_convergence() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    let old_vpc_id = store.load(&id("vpc", "net")).unwrap().unwrap().provider_id;

    let mut declarations = network_cluster_registry();
    declarations[0] = Declaration::new("vpc", "net", attrs(&[("name", "net"), ("region", "nyc1")]));
    let report = reconciler::apply(
        declarations,
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    assert!(report.is_success());

    // The old network must stay alive until the cluster has converged
    // against the replacement: recreate net, re-point k8s, only then
    // delete the original network
    let calls = provider.calls();
    let recreate = calls.iter().rposition(|c| c == "create net").unwrap();
    let repoint = calls.iter().rposition(|c| c == "create k8s").unwrap();
    let delete_old = calls
        .iter()
        .position(|c| *c == format!("delete {old_vpc_id}"))
        .unwrap();
    assert!(recreate < repoint, "calls: {calls:?}");
    assert!(repoint < delete_old, "calls: {calls:?}");
}

#[test]
fn scenario_permanent_failure_isolates_subgraph() {
    let provider = TestProvider {
        fail_permanent: vec!["k8s".into()],
        ..Default::default()
    };
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    // Extend the scenario with a node pool downstream of the cluster
    let mut declarations = network_cluster_registry();
    let mut pool = attrs(&[("name", "workers"), ("size", "s-2vcpu-4gb")]);
    pool.insert(
        "cluster_id".into(),
        Value::Ref(OutputBinding::new(id("cluster", "k8s"), "id")),
    );
    declarations.push(Declaration::new("node_pool", "workers", pool));

    let report = reconciler::apply(
        declarations,
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    assert!(!report.is_success());

    let cluster = report.outcome(&id("cluster", "k8s")).unwrap();
    assert_eq!(cluster.state, LifecycleState::Failed);
    // Permanent errors are not retried
    assert_eq!(cluster.attempts, 1);

    // The dependent failed without its create ever being invoked
    let pool = report.outcome(&id("node_pool", "workers")).unwrap();
    assert_eq!(pool.state, LifecycleState::Failed);
    assert_eq!(pool.attempts, 0);
    assert!(pool.error.as_deref().unwrap().contains("cluster.k8s"));
    assert!(!provider.calls().contains(&"create workers".to_string()));

    // Sibling subgraphs still converged
    assert!(report.outcome(&id("vpc", "net")).unwrap().is_ready());
    assert!(report.outcome(&id("registry", "hub")).unwrap().is_ready());
}

#[test]
fn scenario_fail_fast_stops_dispatch() {
    let provider = TestProvider {
        fail_permanent: vec!["net".into()],
        ..Default::default()
    };
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    let options = ExecuteOptions {
        failure_mode: FailureMode::FailFast,
        ..fast_options()
    };
    let report = reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &options,
        &cancel,
    )
    .unwrap();

    assert!(!report.is_success());
    // Nothing pending survives a fail-fast abort
    for outcome in &report.outcomes {
        assert!(
            outcome.state.is_terminal(),
            "{} left in {}",
            outcome.id,
            outcome.state
        );
    }
    let cluster = report.outcome(&id("cluster", "k8s")).unwrap();
    assert_eq!(cluster.state, LifecycleState::Failed);
    assert_eq!(cluster.attempts, 0);
}

#[test]
fn scenario_transient_failures_are_retried() {
    let provider = TestProvider {
        fail_transient: Mutex::new(HashMap::from([("hub".to_string(), 2)])),
        ..Default::default()
    };
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    let report = reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();

    assert!(report.is_success());
    let registry = report.outcome(&id("registry", "hub")).unwrap();
    assert_eq!(registry.attempts, 3);
}

#[test]
fn scenario_cancellation_stops_dispatch() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();

    assert!(report.canceled);
    assert!(!report.is_success());
    assert!(provider.calls().is_empty());
    for outcome in &report.outcomes {
        assert_eq!(outcome.state, LifecycleState::Pending);
    }
}

#[test]
fn scenario_undeclared_records_are_pruned_in_order() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    reconciler::apply(
        network_cluster_registry(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    let vpc_pid = store.load(&id("vpc", "net")).unwrap().unwrap().provider_id;
    let cluster_pid = store.load(&id("cluster", "k8s")).unwrap().unwrap().provider_id;

    // Destroy: apply an empty declaration set
    let report = reconciler::apply(
        Vec::new(),
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap();
    assert!(report.is_success());
    assert_eq!(report.summary().deleted, 3);
    assert!(store.list().unwrap().is_empty());

    // The cluster (dependent) went before the network it depends on
    let calls = provider.calls();
    let del_cluster = calls
        .iter()
        .position(|c| *c == format!("delete {cluster_pid}"))
        .unwrap();
    let del_vpc = calls
        .iter()
        .position(|c| *c == format!("delete {vpc_pid}"))
        .unwrap();
    assert!(del_cluster < del_vpc);
}

#[test]
fn scenario_construction_errors_touch_nothing() {
    let provider = TestProvider::default();
    let store = MemoryStateStore::new();
    let cancel = CancelToken::new();

    let declarations = vec![
        Declaration::new("a", "x", Attrs::new()).depends_on(id("b", "y")),
        Declaration::new("b", "y", Attrs::new()).depends_on(id("a", "x")),
    ];
    let err = reconciler::apply(
        declarations,
        &provider,
        &store,
        &schemas(),
        &fast_options(),
        &cancel,
    )
    .unwrap_err();

    assert!(matches!(err, Error::Cycle { .. }));
    assert!(provider.calls().is_empty());
    assert!(store.list().unwrap().is_empty());
}
