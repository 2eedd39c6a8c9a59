use crate::jvm::code::{
    default_value, load_var, put_static, store_var, InsnList, MethodCode, Node,
};
use crate::jvm::Instruction;
use crate::localvar::{local_var_id, Initialize, LocalVars, SyntheticLocalVar};
use crate::util::Width;
use crate::weaver::Error;
use log::warn;
use std::collections::{BTreeSet, HashMap};

/// Turn the synthetic locals `used` in a method into locals of the method
///
/// Variables get initialized on method entry (unless they ask not to be), then every
/// `getstatic`/`putstatic` of one of them becomes a load/store of a fresh slot past the current
/// `max_locals`. Variables are laid out in the order of their ids, each taking as many slots as
/// its type needs.
pub fn static_to_local(
    method: &mut MethodCode,
    vars: &LocalVars,
    used: &BTreeSet<String>,
) -> Result<(), Error> {
    let locals: Vec<&SyntheticLocalVar> = vars
        .synthetic_locals()
        .filter(|var| used.contains(&var.id()))
        .collect();
    if locals.is_empty() {
        return Ok(());
    }

    // Initialization still goes through the static fields, rewritten below with everything else
    method.instructions.splice_front(init_code(&locals));

    let mut slots: HashMap<String, u16> = HashMap::new();
    let mut next_slot = method.max_locals;
    for var in &locals {
        let slot = u16::try_from(next_slot).map_err(|_| {
            Error::Fatal(format!(
                "no local slot left for synthetic local {} in {}",
                var.id(),
                method.display_name()
            ))
        })?;
        slots.insert(var.id(), slot);
        next_slot += var.field_type.width();
    }

    let insns = &mut method.instructions;
    for id in insns.ids() {
        let replacement = match insns.insn(id) {
            Some(Instruction::GetStatic(field)) => slots
                .get(&local_var_id(&field.owner, &field.name))
                .map(|slot| load_var(&field.descriptor, *slot)),
            Some(Instruction::PutStatic(field)) => slots
                .get(&local_var_id(&field.owner, &field.name))
                .map(|slot| store_var(&field.descriptor, *slot)),
            _ => None,
        };
        if let Some(replacement) = replacement {
            *insns.node_mut(id) = Node::Insn(replacement);
        }
    }

    method.max_locals = next_slot;
    Ok(())
}

fn init_code(locals: &[&SyntheticLocalVar]) -> InsnList {
    let mut code = InsnList::new();
    for var in locals {
        match var.initialize {
            Initialize::Never => continue,
            Initialize::BestEffort => warn!(
                "best-effort initialization of {} is not supported, always initializing it",
                var.id()
            ),
            Initialize::Always => (),
        }

        match &var.init_code {
            Some(init) => {
                code.splice_back(init.clone());
            }
            None => {
                for insn in default_value(&var.field_type) {
                    code.push_insn(insn);
                }
                code.push_insn(put_static(&var.owner, &var.name, var.field_type.clone()));
            }
        }
    }
    code
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{insn_list, parse_method, render_node};
    use crate::jvm::FieldType;

    fn rendered(insns: &InsnList) -> Vec<String> {
        insns
            .iter()
            .filter_map(|id| render_node(insns.node(id)))
            .collect()
    }

    fn vars() -> LocalVars {
        let mut vars = LocalVars::new();
        vars.add_synthetic_local(SyntheticLocalVar::new(
            "Instr",
            "total",
            FieldType::long(),
            Initialize::Always,
        ));
        let mut flag = SyntheticLocalVar::new(
            "Instr",
            "flag",
            FieldType::int(),
            Initialize::BestEffort,
        );
        flag.init_code = Some(insn_list([
            Instruction::IConst1,
            put_static("Instr", "flag", FieldType::int()),
        ]));
        vars.add_synthetic_local(flag);
        vars.add_synthetic_local(SyntheticLocalVar::new(
            "Instr",
            "name",
            FieldType::string(),
            Initialize::Never,
        ));
        vars
    }

    #[test]
    fn accesses_become_locals() {
        let mut method = parse_method(
            r#"
            method f (I)V
              getstatic Instr.name Ljava/lang/String;
              pop
              getstatic Instr.total J
              putstatic Instr.total J
              getstatic Other.total J
              pop2
              return
            "#,
        )
        .unwrap();
        let used = BTreeSet::from([
            String::from("Instr.total"),
            String::from("Instr.flag"),
            String::from("Instr.name"),
        ]);

        static_to_local(&mut method, &vars(), &used).unwrap();

        // By id: `flag` (slot 2), `name` (slot 3), `total` (slots 4 and 5)
        assert_eq!(
            rendered(&method.instructions),
            vec![
                "iconst_1",
                "istore 2",
                "lconst_0",
                "lstore 4",
                "aload 3",
                "pop",
                "lload 4",
                "lstore 4",
                "getstatic Other.total J",
                "pop2",
                "return"
            ]
        );
        assert_eq!(method.max_locals, 6);
    }

    #[test]
    fn unused_variables_are_ignored() {
        let mut method = parse_method(
            r#"
            method static f ()V
              getstatic Instr.total J
              pop2
              return
            "#,
        )
        .unwrap();
        static_to_local(&mut method, &vars(), &BTreeSet::new()).unwrap();
        assert_eq!(
            rendered(&method.instructions),
            vec!["getstatic Instr.total J", "pop2", "return"]
        );
        assert_eq!(method.max_locals, 0);
    }
}
