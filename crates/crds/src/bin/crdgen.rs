//! Prints the CustomResourceDefinition YAML for every type in this crate.

use crds::Machine;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Machine::crd())?);
    Ok(())
}
