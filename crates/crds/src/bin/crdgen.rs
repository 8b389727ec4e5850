//! Prints the CAPC CustomResourceDefinitions as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/bases/capc.yaml`

use crds::{ContaboCluster, ContaboMachine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ContaboCluster::crd(), ContaboMachine::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
