use crate::value::{InterfaceMap, PropertyMap};

/// A signal delivered by the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Interfaces were published on an object.
    InterfacesAdded {
        /// The object path.
        path: String,

        /// The added interfaces with their full property sets.
        interfaces: InterfaceMap,
    },

    /// Interfaces were withdrawn from an object.
    InterfacesRemoved {
        /// The object path.
        path: String,

        /// The removed interface names.
        interfaces: Vec<String>,
    },

    /// Properties of one interface changed.
    PropertiesChanged {
        /// The object path.
        path: String,

        /// The interface the properties belong to.
        interface: String,

        /// Only the properties that changed, with their new values.
        changed: PropertyMap,
    },

    /// Ownership of a bus name changed. An empty owner means "no owner".
    NameOwnerChanged {
        /// The bus name.
        name: String,

        /// The previous owner's unique name.
        old_owner: String,

        /// The new owner's unique name.
        new_owner: String,
    },

    /// A payload-free signal emitted by an object.
    Emitted {
        /// The object path.
        path: String,

        /// The emitting interface.
        interface: String,

        /// The signal member name.
        member: String,
    },
}

impl Signal {
    /// Returns whether this is a bus name going from an owner to no owner.
    #[must_use]
    pub fn is_name_lost(&self) -> bool {
        matches!(
            self,
            Self::NameOwnerChanged { old_owner, new_owner, .. }
                if !old_owner.is_empty() && new_owner.is_empty()
        )
    }
}

/// Selects which signals a subscription receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchRule {
    /// `InterfacesAdded` for one object path.
    InterfacesAddedAtPath(String),

    /// `InterfacesRemoved` for one object path.
    InterfacesRemovedAtPath(String),

    /// `PropertiesChanged` for one interface on one object path.
    PropertiesChanged {
        /// The object path.
        path: String,

        /// The interface.
        interface: String,
    },

    /// `NameOwnerChanged` for one bus name.
    NameOwnerChanged(String),

    /// One emitted signal member on one interface and object path.
    Emitted {
        /// The object path.
        path: String,

        /// The interface.
        interface: String,

        /// The member name.
        member: String,
    },
}

impl MatchRule {
    /// Returns whether `signal` is selected by this rule.
    #[must_use]
    pub fn matches(&self, signal: &Signal) -> bool {
        match (self, signal) {
            (Self::InterfacesAddedAtPath(rule_path), Signal::InterfacesAdded { path, .. })
            | (Self::InterfacesRemovedAtPath(rule_path), Signal::InterfacesRemoved { path, .. }) => {
                rule_path == path
            }
            (
                Self::PropertiesChanged {
                    path: rule_path,
                    interface: rule_interface,
                },
                Signal::PropertiesChanged {
                    path, interface, ..
                },
            ) => rule_path == path && rule_interface == interface,
            (Self::NameOwnerChanged(rule_name), Signal::NameOwnerChanged { name, .. }) => {
                rule_name == name
            }
            (
                Self::Emitted {
                    path: rule_path,
                    interface: rule_interface,
                    member: rule_member,
                },
                Signal::Emitted {
                    path,
                    interface,
                    member,
                },
            ) => rule_path == path && rule_interface == interface && rule_member == member,
            _ => false,
        }
    }
}
