//! Partitions registry entries into producers and consumers and attaches to
//! each producer the consumers that declared a dependency on it.
//!
//! Associations are held by logical name only and the whole topology is
//! rebuilt on every discovery pass, so no object reference ever crosses an
//! unload boundary.

use tracing::debug;

use super::registry::PluginRegistry;

/// One producer and the names of the consumers bound to it.
#[derive(Debug, Clone)]
pub struct ProducerSlot {
    pub name: String,
    pub dependents: Vec<String>,
}

/// The producer→dependent-consumer map plus the agnostic consumer set.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    producers: Vec<ProducerSlot>,
    agnostic: Vec<String>,
}

impl Topology {
    /// Build the topology from the instantiated records of `registry`.
    ///
    /// A consumer whose declared required-producer name matches no producer
    /// attaches nowhere (it will never receive data until a reload finds its
    /// producer). The match is exact and case-sensitive, as declared.
    pub fn build(registry: &PluginRegistry) -> Self {
        let mut producers: Vec<ProducerSlot> = registry
            .iter()
            .filter(|r| r.is_producer())
            .map(|r| ProducerSlot {
                name: r.name.clone(),
                dependents: Vec::new(),
            })
            .collect();
        let mut agnostic = Vec::new();

        for record in registry.iter().filter(|r| r.is_consumer()) {
            let required = record
                .instance
                .as_ref()
                .and_then(|i| i.as_consumer())
                .and_then(|c| c.required_producer())
                .filter(|name| !name.is_empty());

            match required {
                Some(producer_name) => {
                    match producers.iter_mut().find(|p| p.name == producer_name) {
                        Some(slot) => slot.dependents.push(record.name.clone()),
                        None => debug!(
                            consumer = %record.name,
                            required = %producer_name,
                            "required producer not present; consumer left unattached"
                        ),
                    }
                }
                None => agnostic.push(record.name.clone()),
            }
        }

        Self {
            producers,
            agnostic,
        }
    }

    pub fn producers(&self) -> &[ProducerSlot] {
        &self.producers
    }

    pub fn agnostic(&self) -> &[String] {
        &self.agnostic
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() && self.agnostic.is_empty()
    }
}
