mod egressip;
mod netpolicy;

use crate::suites::Spec;

pub fn specs() -> Vec<Spec> {
    let mut specs = egressip::specs();
    specs.extend(netpolicy::specs());
    specs
}
