//! Dumps CustomResourceDefinition YAML for all five CRDs this controller
//! watches, one `---`-separated document per kind.

use kube::CustomResourceExt;
use machine_lifecycle_operator::crd::{
    Machine, MachineDeployment, MachineDisruptionBudget, MachineHealthCheck, MachineSet,
};

fn main() {
    let crds = vec![
        serde_yaml::to_string(&Machine::crd()).unwrap(),
        serde_yaml::to_string(&MachineHealthCheck::crd()).unwrap(),
        serde_yaml::to_string(&MachineDisruptionBudget::crd()).unwrap(),
        serde_yaml::to_string(&MachineSet::crd()).unwrap(),
        serde_yaml::to_string(&MachineDeployment::crd()).unwrap(),
    ];
    println!("{}", crds.join("---\n"));
}
