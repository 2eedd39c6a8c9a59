use crate::jvm::code::{InsnId, InsnList, MethodCode};
use crate::weaver::Error;

/// Order the exception table so that shorter ranges come first, then check that no two ranges
/// straddle each other
///
/// The JVM picks the first matching entry, so a range nested in another must come before it.
/// The sort is stable: ranges of the same length keep their relative order.
pub fn sort_try_catch_blocks(method: &mut MethodCode) -> Result<(), Error> {
    let insns = &method.instructions;
    let mut keyed = Vec::with_capacity(method.try_catch_blocks.len());
    for tcb in method.try_catch_blocks.drain(..) {
        let (start, end) = range(insns, tcb.start, tcb.end)?;
        keyed.push((end as isize - start as isize, tcb));
    }
    keyed.sort_by_key(|(length, _)| *length);
    method.try_catch_blocks = keyed.into_iter().map(|(_, tcb)| tcb).collect();

    validate(method)
}

/// Positions of the first real instruction of a range and of its end label
fn range(insns: &InsnList, start: InsnId, end: InsnId) -> Result<(usize, usize), Error> {
    let missing = || Error::Fatal(String::from("exception table refers to a missing label"));
    let first = insns.first_real_from(start).unwrap_or(end);
    let start = insns.index_of(first).ok_or_else(missing)?;
    let end = insns.index_of(end).ok_or_else(missing)?;
    Ok((start, end))
}

fn validate(method: &MethodCode) -> Result<(), Error> {
    let insns = &method.instructions;
    let ranges = method
        .try_catch_blocks
        .iter()
        .map(|tcb| range(insns, tcb.start, tcb.end))
        .collect::<Result<Vec<_>, _>>()?;

    let before = |from: usize, to: usize| insns.has_real_between(from, to);
    let straddles = |(a_start, a_end): (usize, usize), (b_start, b_end): (usize, usize)| {
        before(a_start, b_start) && before(b_start, a_end) && before(a_end, b_end)
    };

    for (i, first) in ranges.iter().enumerate() {
        for second in &ranges[i..] {
            if straddles(*first, *second) || straddles(*second, *first) {
                return Err(Error::OverlappingExceptionHandler {
                    method: method.display_name(),
                    first: *first,
                    second: *second,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::parse_method;

    #[test]
    fn inner_ranges_first() {
        let mut method = parse_method(
            r#"
            method static f ()V
            L0:
              invokestatic A.a ()V
            L1:
              invokestatic A.b ()V
            L2:
              return
            L3:
              pop
              return
            L4:
              pop
              return
            try L0 L2 L3 *
            try L1 L2 L4 java/lang/Exception
            "#,
        )
        .unwrap();
        let handlers: Vec<InsnId> = method.try_catch_blocks.iter().map(|t| t.handler).collect();

        sort_try_catch_blocks(&mut method).unwrap();
        let sorted: Vec<InsnId> = method.try_catch_blocks.iter().map(|t| t.handler).collect();
        assert_eq!(sorted, vec![handlers[1], handlers[0]]);
    }

    #[test]
    fn straddling_ranges_are_rejected() {
        let mut method = parse_method(
            r#"
            method static f ()V
            L0:
              invokestatic A.a ()V
            L1:
              invokestatic A.b ()V
            L2:
              invokestatic A.c ()V
            L3:
              return
            L4:
              pop
              return
            try L0 L2 L4 *
            try L1 L3 L4 *
            "#,
        )
        .unwrap();
        assert!(matches!(
            sort_try_catch_blocks(&mut method),
            Err(Error::OverlappingExceptionHandler { .. })
        ));
    }

    #[test]
    fn ranges_sharing_an_end_are_fine() {
        let mut method = parse_method(
            r#"
            method static f ()V
            L0:
              invokestatic A.a ()V
              invokestatic A.b ()V
            L1:
              return
            L2:
              pop
              return
            try L0 L1 L2 *
            try L0 L1 L2 java/lang/Error
            "#,
        )
        .unwrap();
        sort_try_catch_blocks(&mut method).unwrap();
        assert_eq!(
            method.try_catch_blocks[1].exception.as_deref(),
            Some("java/lang/Error")
        );
    }
}
