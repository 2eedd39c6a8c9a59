use bitflags::bitflags;

bitflags! {
    /// Access flags on methods
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

impl MethodAccessFlags {
    /// Modifiers a method listing header may carry, in printing order
    pub const MODIFIERS: [(MethodAccessFlags, &'static str); 8] = [
        (MethodAccessFlags::PUBLIC, "public"),
        (MethodAccessFlags::PRIVATE, "private"),
        (MethodAccessFlags::PROTECTED, "protected"),
        (MethodAccessFlags::STATIC, "static"),
        (MethodAccessFlags::FINAL, "final"),
        (MethodAccessFlags::SYNCHRONIZED, "synchronized"),
        (MethodAccessFlags::NATIVE, "native"),
        (MethodAccessFlags::ABSTRACT, "abstract"),
    ];

    pub fn from_modifier(keyword: &str) -> Option<MethodAccessFlags> {
        MethodAccessFlags::MODIFIERS
            .iter()
            .find(|(_, modifier)| *modifier == keyword)
            .map(|(flag, _)| *flag)
    }
}

bitflags! {
    /// Access flags on fields (only ever emitted, for thread local fields)
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modifiers() {
        assert_eq!(
            MethodAccessFlags::from_modifier("static"),
            Some(MethodAccessFlags::STATIC)
        );
        assert_eq!(MethodAccessFlags::from_modifier("strictfp"), None);
    }
}
