//! The bucket state: one ordered map per entity kind.
//!
//! [`StoreState`] is plain data. It is the unit of snapshotting, the working
//! copy inside a transaction, and the point-in-time view handed to the
//! scheduler and reconciler at the start of each cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use warren_types::{
    Certificate, CertificateId, Container, ContainerId, IngressRule, IngressRuleId, Node, NodeId,
    Secret, SecretId, Service, ServiceId, Volume, VolumeId,
};

use crate::{Result, StoreError};

/// Every bucket of cluster state.
///
/// Serialization walks the buckets in declaration order with keys ascending,
/// which makes the encoding deterministic across replicas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Highest replicated op number applied into this state.
    applied_op: u64,
    nodes: BTreeMap<NodeId, Node>,
    services: BTreeMap<ServiceId, Service>,
    containers: BTreeMap<ContainerId, Container>,
    secrets: BTreeMap<SecretId, Secret>,
    volumes: BTreeMap<VolumeId, Volume>,
    ingress_rules: BTreeMap<IngressRuleId, IngressRule>,
    certificates: BTreeMap<CertificateId, Certificate>,
}

macro_rules! bucket_ops {
    ($bucket:ident, $kind:literal, $id_ty:ty, $entity:ty,
     $create:ident, $get:ident, $list:ident, $update:ident, $delete:ident) => {
        /// Inserts a new record; fails `AlreadyExists` on a duplicate key.
        pub fn $create(&mut self, entity: $entity) -> Result<()> {
            let id = entity.id.clone();
            if self.$bucket.contains_key(&id) {
                return Err(StoreError::already_exists($kind, id.to_string()));
            }
            self.$bucket.insert(id, entity);
            Ok(())
        }

        pub fn $get(&self, id: &$id_ty) -> Option<&$entity> {
            self.$bucket.get(id)
        }

        /// Returns all records in key order. The collection is decoupled
        /// from the live buckets; later mutations do not affect it.
        pub fn $list(&self) -> Vec<$entity> {
            self.$bucket.values().cloned().collect()
        }

        /// Replaces an existing record; fails `NotFound` if absent.
        pub fn $update(&mut self, entity: $entity) -> Result<()> {
            let id = entity.id.clone();
            if !self.$bucket.contains_key(&id) {
                return Err(StoreError::not_found($kind, id.to_string()));
            }
            self.$bucket.insert(id, entity);
            Ok(())
        }

        /// Removes a record; fails `NotFound` if absent.
        pub fn $delete(&mut self, id: &$id_ty) -> Result<$entity> {
            self.$bucket
                .remove(id)
                .ok_or_else(|| StoreError::not_found($kind, id.to_string()))
        }
    };
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest replicated op number applied into this state. Maintained by
    /// the apply driver, snapshotted with the buckets.
    pub fn applied_op(&self) -> u64 {
        self.applied_op
    }

    pub fn set_applied_op(&mut self, op: u64) {
        debug_assert!(op >= self.applied_op, "applied op must not move backward");
        self.applied_op = op;
    }

    bucket_ops!(nodes, "node", NodeId, Node, create_node, node, nodes, update_node, delete_node);
    bucket_ops!(
        services, "service", ServiceId, Service, create_service, service, services,
        update_service, delete_service
    );
    bucket_ops!(
        containers, "container", ContainerId, Container, create_container, container, containers,
        update_container, delete_container
    );
    bucket_ops!(
        secrets, "secret", SecretId, Secret, create_secret, secret, secrets, update_secret,
        delete_secret
    );
    bucket_ops!(
        volumes, "volume", VolumeId, Volume, create_volume, volume, volumes, update_volume,
        delete_volume
    );
    bucket_ops!(
        ingress_rules, "ingress rule", IngressRuleId, IngressRule, create_ingress_rule,
        ingress_rule, ingress_rules, update_ingress_rule, delete_ingress_rule
    );
    bucket_ops!(
        certificates, "certificate", CertificateId, Certificate, create_certificate, certificate,
        certificates, update_certificate, delete_certificate
    );

    // ========================================================================
    // Domain read helpers
    // ========================================================================

    /// Borrowing iteration in key order, for control loops that walk the
    /// whole bucket without cloning it.
    pub fn nodes_iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn services_iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn containers_iter(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    /// Looks up a primary (non-shadow) service by its cluster-unique name.
    pub fn service_by_name(&self, name: &str) -> Option<&Service> {
        self.services
            .values()
            .find(|s| s.name == name && !s.is_shadow())
    }

    /// The blue-green shadow of a primary service, if one exists.
    pub fn shadow_of(&self, primary: &ServiceId) -> Option<&Service> {
        self.services.values().find(|s| {
            s.labels
                .get(warren_types::labels::DEPLOYMENT_ORIGINAL_SERVICE)
                .is_some_and(|orig| orig == primary.as_str())
        })
    }

    /// All containers owned by a service, in key order.
    pub fn containers_of_service(&self, service_id: &ServiceId) -> Vec<&Container> {
        self.containers
            .values()
            .filter(|c| &c.service_id == service_id)
            .collect()
    }

    /// All containers assigned to a node, in key order.
    pub fn containers_on_node(&self, node_id: &NodeId) -> Vec<&Container> {
        self.containers
            .values()
            .filter(|c| &c.node_id == node_id)
            .collect()
    }

    /// Looks up a volume by its cluster-unique name.
    pub fn volume_by_name(&self, name: &str) -> Option<&Volume> {
        self.volumes.values().find(|v| v.name == name)
    }

    /// Looks up a secret by its cluster-unique name.
    pub fn secret_by_name(&self, name: &str) -> Option<&Secret> {
        self.secrets.values().find(|s| s.name == name)
    }

    /// Canonical encoding: buckets in declaration order, keys ascending.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Integrity digest over the canonical encoding.
    pub fn digest(&self) -> Result<blake3::Hash> {
        Ok(blake3::hash(&self.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warren_types::{NodeRole, NodeStatus, Resources, Timestamp};

    pub(crate) fn sample_node(id: &str) -> Node {
        Node {
            id: NodeId::new(id),
            role: NodeRole::Worker,
            address: "10.0.0.1:7411".to_string(),
            capacity: Resources::new(4_000, 8 << 30, 0),
            available: Resources::new(4_000, 8 << 30, 0),
            labels: BTreeMap::new(),
            status: NodeStatus::Ready,
            last_heartbeat: Timestamp::ZERO,
            created_at: Timestamp::ZERO,
            updated_at: Timestamp::ZERO,
        }
    }

    #[test]
    fn create_twice_fails_already_exists() {
        let mut state = StoreState::new();
        state.create_node(sample_node("a")).unwrap();
        let err = state.create_node(sample_node("a")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { kind: "node", .. }));
    }

    #[test]
    fn update_absent_fails_not_found() {
        let mut state = StoreState::new();
        let err = state.update_node(sample_node("a")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "node", .. }));

        state.create_node(sample_node("a")).unwrap();
        let mut node = sample_node("a");
        node.status = NodeStatus::Down;
        state.update_node(node).unwrap();
        assert_eq!(
            state.node(&NodeId::new("a")).unwrap().status,
            NodeStatus::Down
        );
    }

    #[test]
    fn listings_are_snapshots() {
        let mut state = StoreState::new();
        state.create_node(sample_node("a")).unwrap();
        let listing = state.nodes();
        state.create_node(sample_node("b")).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(state.nodes().len(), 2);
    }

    #[test]
    fn encoding_is_deterministic_regardless_of_insert_order() {
        let mut forward = StoreState::new();
        forward.create_node(sample_node("a")).unwrap();
        forward.create_node(sample_node("b")).unwrap();

        let mut reverse = StoreState::new();
        reverse.create_node(sample_node("b")).unwrap();
        reverse.create_node(sample_node("a")).unwrap();

        assert_eq!(forward.encode().unwrap(), reverse.encode().unwrap());
        assert_eq!(
            forward.digest().unwrap().as_bytes(),
            reverse.digest().unwrap().as_bytes()
        );
    }

    #[test]
    fn applied_op_round_trips_through_encoding() {
        let mut state = StoreState::new();
        state.set_applied_op(42);
        let back = StoreState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(back.applied_op(), 42);
    }
}
