//! CRD YAML Generator
//!
//! Prints the Kubernetes CRD manifests for Backup, Restore and Config.
//!
//! Usage: cargo run --bin crdgen > deploy/crds.yaml

use ark_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
