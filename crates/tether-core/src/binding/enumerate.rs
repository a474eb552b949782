//! Member enumeration

use super::canonical::hyphen_to_underscore;
use super::{BindingId, BindingRegistry};
use crate::native::NativeSystem;
use indexmap::IndexSet;

impl BindingRegistry {
    /// Names a binding can resolve, for managed-side enumeration.
    ///
    /// Interface members come first, then the type's own. Static functions
    /// are skipped and property names are reported in underscore form.
    pub fn enumerate(&self, native: &dyn NativeSystem, id: BindingId) -> Vec<String> {
        let binding = self.binding(id);
        let mut names = IndexSet::new();

        for iface in native.type_interfaces(binding.native_type) {
            let Some(info) = native.interface_info(iface) else {
                continue;
            };
            for method in info.methods.iter().filter(|m| m.is_method()) {
                names.insert(method.name.clone());
            }
            for prop in &info.properties {
                names.insert(hyphen_to_underscore(&prop.name));
            }
        }

        if let Some(info) = &binding.info {
            for method in info.methods.iter().filter(|m| m.is_method()) {
                names.insert(method.name.clone());
            }
            for prop in &info.properties {
                names.insert(hyphen_to_underscore(&prop.name));
            }
        }

        names.into_iter().collect()
    }
}
