//! Built-in capability table for the supported resource kinds.
//!
//! Attributes listed as mutable can change in place; anything else
//! forces a replacement. Unknown kinds fall back to the conservative
//! default where every change replaces.

use reconciler::{SchemaRegistry, TypeSchema};

pub fn builtin() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(
            "project",
            TypeSchema::new().mutable(["name", "description", "purpose", "environment"]),
        )
        // Region and address range pin a VPC to its placement
        .register("vpc", TypeSchema::new().mutable(["name", "description"]))
        .register(
            "cluster",
            TypeSchema::new().mutable(["version", "auto_upgrade", "surge_upgrade", "tags"]),
        )
        .register(
            "node_pool",
            TypeSchema::new().mutable(["count", "auto_scale", "min_nodes", "max_nodes", "tags"]),
        )
        .register("registry", TypeSchema::new().mutable(["subscription_tier"]))
        .register(
            "load_balancer",
            TypeSchema::new().mutable(["forwarding_rules", "health_check", "droplet_tag"]),
        )
        .register(
            "helm_release",
            TypeSchema::new().mutable(["version", "values"]),
        )
}
