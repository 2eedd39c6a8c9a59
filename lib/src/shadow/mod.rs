//! Regions of a method that snippets get woven around
//!
//! A marker picks out [`MarkedRegion`]s: a start and the nodes the region exits through. The
//! weaver needs more than that. "After" snippets go after every exit except when the exit is a
//! jump (then they must go before it), and "after throwing" snippets need a single range to
//! protect with a synthetic exception handler. That is the [`WeavingRegion`], which markers
//! either compute themselves or leave to [`default_weaving_region`].
//!
//! A [`Shadow`] is the region as handed to the weaver. Its weaving region is later rewritten in
//! place to point at fresh labels (see [`crate::weaver::WeavingInfo`]).

mod markers;

pub use markers::*;

use crate::jvm::code::{InsnId, MethodCode};

/// Where code gets inserted for one marked region
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeavingRegion {
    /// Location of "before" snippets
    pub start: InsnId,

    /// Locations of "after" snippets
    ///
    /// `None` means the ends are derived from the region ends when weaving: every end, except
    /// that an end which is a jump moves to the node before it.
    pub ends: Option<Vec<InsnId>>,

    /// First node protected by the handler of "after throwing" snippets
    pub after_throw_start: InsnId,

    /// Last node protected by the handler of "after throwing" snippets
    pub after_throw_end: InsnId,
}

/// Region of a method picked out by a marker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkedRegion {
    pub start: InsnId,
    pub ends: Vec<InsnId>,

    /// Weaving region, if the marker computed one
    pub weaving_region: Option<WeavingRegion>,
}

impl MarkedRegion {
    pub fn new(start: InsnId, ends: Vec<InsnId>) -> MarkedRegion {
        MarkedRegion {
            start,
            ends,
            weaving_region: None,
        }
    }

    /// Region with its default weaving region filled in
    pub fn with_default_weaving_region(
        method: &MethodCode,
        start: InsnId,
        ends: Vec<InsnId>,
    ) -> MarkedRegion {
        let weaving_region = default_weaving_region(method, start, &ends);
        MarkedRegion {
            start,
            ends,
            weaving_region: Some(weaving_region),
        }
    }

    /// Turn the region into a shadow, computing the default weaving region if needed
    pub fn into_shadow(self, method: &MethodCode) -> Shadow {
        let weaving_region = match self.weaving_region {
            Some(region) => region,
            None => default_weaving_region(method, self.start, &self.ends),
        };
        Shadow {
            region_start: self.start,
            region_ends: self.ends,
            weaving_region,
        }
    }
}

/// Marked region matched against a method, ready to be woven
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shadow {
    pub region_start: InsnId,
    pub region_ends: Vec<InsnId>,
    pub weaving_region: WeavingRegion,
}

impl Shadow {
    /// Mark a method and turn every region into a shadow
    pub fn mark(marker: &dyn Marker, method: &MethodCode) -> Vec<Shadow> {
        marker
            .mark(method)
            .into_iter()
            .map(|region| region.into_shadow(method))
            .collect()
    }
}

/// Weaving region derived from the start and ends of a region
///
/// "After" locations are left to be derived from the ends. The "after throwing" range runs from
/// the start to whichever end comes last in the method. If that end is a label closing an
/// exception range, the range is pulled back in front of it so that the synthetic handler never
/// straddles the end of an existing one.
pub fn default_weaving_region(
    method: &MethodCode,
    start: InsnId,
    ends: &[InsnId],
) -> WeavingRegion {
    let insns = &method.instructions;

    let mut after_throw_end = None;
    let mut cursor = insns.last();
    while let Some(id) = cursor {
        if ends.contains(&id) {
            after_throw_end = Some(id);
            break;
        }
        cursor = insns.prev(id);
    }
    let mut after_throw_end = after_throw_end.unwrap_or(start);

    while insns.node(after_throw_end).is_label()
        && method
            .try_catch_blocks
            .iter()
            .any(|tcb| tcb.end == after_throw_end)
    {
        match insns.prev(after_throw_end) {
            Some(prev) => after_throw_end = prev,
            None => break,
        }
    }

    WeavingRegion {
        start,
        ends: None,
        after_throw_start: start,
        after_throw_end,
    }
}

/// Region covering exactly one instruction
///
/// "After" code goes right after the instruction, even when it is a jump.
pub fn insn_region(insn: InsnId) -> MarkedRegion {
    MarkedRegion {
        start: insn,
        ends: vec![insn],
        weaving_region: Some(WeavingRegion {
            start: insn,
            ends: Some(vec![insn]),
            after_throw_start: insn,
            after_throw_end: insn,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::parse_method;

    #[test]
    fn after_throw_end_is_the_last_end() {
        let method = parse_method(
            r#"
            method static f (I)I
              iload 0
              ifeq ZERO
              iconst_1
              ireturn
            ZERO:
              iconst_0
              ireturn
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let first = insns.first().unwrap();
        let returns: Vec<InsnId> = insns.iter().filter(|id| insns.node(*id).is_return()).collect();

        let region = default_weaving_region(&method, first, &returns);
        assert_eq!(region.start, first);
        assert_eq!(region.ends, None);
        assert_eq!(region.after_throw_start, first);
        assert_eq!(region.after_throw_end, returns[1]);
    }

    #[test]
    fn after_throw_end_backs_out_of_exception_range_ends() {
        let method = parse_method(
            r#"
            method static f ()V
            START:
              invokestatic A.g ()V
            END:
              return
            HANDLER:
              athrow
              try START END HANDLER *
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let start = insns.get(0).unwrap();
        let end_label = insns.get(2).unwrap();

        let region = default_weaving_region(&method, start, &[end_label]);
        assert_eq!(region.after_throw_end, insns.get(1).unwrap());
    }

    #[test]
    fn single_instruction_region() {
        let method = parse_method(
            r#"
            method static f ()V
              return
            "#,
        )
        .unwrap();
        let ret = method.instructions.first().unwrap();
        let shadow = insn_region(ret).into_shadow(&method);
        assert_eq!(shadow.region_ends, vec![ret]);
        assert_eq!(shadow.weaving_region.ends, Some(vec![ret]));
    }
}
