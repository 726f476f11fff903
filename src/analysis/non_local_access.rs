// Non-local accesses of memory locations.
//
// A closure that captures an address can read or write the location whenever it is
// invoked, far from where the capture happened. Every `apply` of such a closure, and
// every call the closure is handed to, is recorded as an access of each captured
// address.

use crate::debug_println;
use crate::ir::{Callee, Function, InstId, InstKind, ValueId, ValueRepr};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct NonLocalAccessInfo {
    accesses: HashMap<ValueId, Vec<InstId>>,
}

impl NonLocalAccessInfo {
    pub fn compute(function: &Function) -> Self {
        let mut captured_by: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
        for id in function.instructions() {
            if let InstKind::PartialApply { result, captures, .. } = &function.inst(id).kind {
                let addresses: Vec<ValueId> = captures
                    .iter()
                    .copied()
                    .filter(|c| function.value(*c).repr == ValueRepr::Address)
                    .collect();
                if !addresses.is_empty() {
                    captured_by.insert(*result, addresses);
                }
            }
        }

        let mut accesses: HashMap<ValueId, Vec<InstId>> = HashMap::new();
        if captured_by.is_empty() {
            return Self { accesses };
        }
        for id in function.instructions() {
            let InstKind::Apply { callee, args, .. } = &function.inst(id).kind else {
                continue;
            };
            let mut closures: Vec<ValueId> = args.iter().map(|(v, _)| *v).collect();
            if let Callee::Closure(closure) = callee {
                closures.push(*closure);
            }
            for closure in closures {
                let Some(addresses) = captured_by.get(&closure) else {
                    continue;
                };
                for address in addresses {
                    debug_println!(
                        "NONLOCAL: '{}' accessed through closure '{}'",
                        function.value(*address).name,
                        function.value(closure).name
                    );
                    let list = accesses.entry(*address).or_default();
                    if !list.contains(&id) {
                        list.push(id);
                    }
                }
            }
        }
        Self { accesses }
    }

    /// Instructions that may access `address` from outside the code that names it.
    pub fn accesses(&self, address: ValueId) -> &[InstId] {
        self.accesses.get(&address).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgConvention, FunctionBuilder, Type};

    #[test]
    fn test_closure_apply_is_an_access() {
        let mut b = FunctionBuilder::new("f");
        let slot = b.alloc_stack("slot", Type::leaf("File", true));
        let other = b.alloc_stack("other", Type::leaf("File", true));
        let closure = b.partial_apply("reader", vec![slot]);
        let call = b.apply_closure(closure, vec![]);
        let handoff = b.apply("run", vec![(closure, ArgConvention::Guaranteed)]);
        b.ret(None);
        let function = b.finish();

        let info = NonLocalAccessInfo::compute(&function);
        assert_eq!(info.accesses(slot), &[call, handoff]);
        assert!(info.accesses(other).is_empty());
    }
}
