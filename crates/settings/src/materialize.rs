//! Section materialization
//!
//! After execution, each section's table is read back from the environment,
//! converted to the canonical JSON representation and deserialized into a
//! fresh typed instance that replaces the placeholder. Fields the script
//! never touched keep the defaults seeded before execution; table members
//! unknown to the host type are dropped silently.

use crate::environment::Environment;
use crate::registry::SectionRegistry;
use crate::value::lua_to_json;
use crate::Result;
use std::any::Any;
use std::collections::HashMap;

pub(crate) fn materialize_sections(
    registry: &SectionRegistry,
    env: &Environment,
    instances: &mut HashMap<String, Box<dyn Any>>,
) -> Result<()> {
    for descriptor in registry.descriptors() {
        let value = env.get_global(&descriptor.key)?;
        let json = lua_to_json(&value)?;
        let instance = descriptor.binding.materialize(json)?;
        instances.insert(descriptor.key.clone(), instance);
    }
    Ok(())
}
