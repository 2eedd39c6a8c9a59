//! Line-oriented textual form of a method
//!
//! The format reads like the output of `javap -c`, except that jump targets are named labels and
//! members are written symbolically:
//!
//! ```text
//! class me/alec/Example
//! method public static foo (I)I
//!   iload 0
//!   ifeq L1
//!   iconst_1
//!   ireturn
//! L1:
//!   line 12
//!   iconst_0
//!   ireturn
//! try L0 L1 L2 java/lang/Exception
//! maxlocals 1
//! ```
//!
//! Everything after `//` on a line is ignored. `maxlocals` and `maxstack` are optional: when
//! missing, `maxlocals` is inferred from the parameters and the local variable instructions and
//! `maxstack` is left at 0.

use super::{InsnId, InsnList, MethodCode, Node, TryCatchBlock};
use crate::jvm::{
    BaseType, BranchInstruction, CompareMode, Constant, EqComparison, Error, FieldRef, FieldType,
    IndyRef, Instruction, InvokeType, MethodAccessFlags, MethodDescriptor, MethodRef,
    OrdComparison, ParseDescriptor, RefType, RenderDescriptor, ShiftType,
};
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Clone, Debug, PartialEq)]
struct Token {
    text: String,
    quoted: bool,
}

fn listing_error(line: usize, message: impl Into<String>) -> Error {
    Error::Listing {
        line,
        message: message.into(),
    }
}

fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = vec![];
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '/' && line_comment_starts(&mut chars.clone()) {
            break;
        } else if c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    None => return Err(listing_error(line_no, "unterminated string literal")),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        other => {
                            let msg = format!("invalid escape {:?} in string literal", other);
                            return Err(listing_error(line_no, msg));
                        }
                    },
                    Some(c) => text.push(c),
                }
            }
            tokens.push(Token { text, quoted: true });
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token {
                text,
                quoted: false,
            });
        }
    }
    Ok(tokens)
}

fn line_comment_starts(chars: &mut std::iter::Peekable<std::str::Chars>) -> bool {
    chars.next() == Some('/') && chars.next() == Some('/')
}

/// Instructions without operands, in the order their mnemonics are looked up
const SIMPLE_INSTRUCTIONS: [Instruction; 95] = {
    use Instruction::*;
    [
        Nop,
        AConstNull,
        IConstM1,
        IConst0,
        IConst1,
        IConst2,
        IConst3,
        IConst4,
        IConst5,
        LConst0,
        LConst1,
        FConst0,
        FConst1,
        FConst2,
        DConst0,
        DConst1,
        IALoad,
        LALoad,
        FALoad,
        DALoad,
        AALoad,
        BALoad,
        CALoad,
        SALoad,
        IAStore,
        LAStore,
        FAStore,
        DAStore,
        AAStore,
        BAStore,
        CAStore,
        SAStore,
        Pop,
        Pop2,
        Dup,
        DupX1,
        DupX2,
        Dup2,
        Dup2X1,
        Dup2X2,
        Swap,
        IAdd,
        LAdd,
        FAdd,
        DAdd,
        ISub,
        LSub,
        FSub,
        DSub,
        IMul,
        LMul,
        FMul,
        DMul,
        IDiv,
        LDiv,
        FDiv,
        DDiv,
        IRem,
        LRem,
        FRem,
        DRem,
        INeg,
        LNeg,
        FNeg,
        DNeg,
        ISh(ShiftType::Left),
        ISh(ShiftType::ArithmeticRight),
        ISh(ShiftType::LogicalRight),
        LSh(ShiftType::Left),
        LSh(ShiftType::ArithmeticRight),
        LSh(ShiftType::LogicalRight),
        IAnd,
        LAnd,
        IOr,
        LOr,
        IXor,
        LXor,
        I2L,
        I2F,
        I2D,
        L2I,
        L2F,
        L2D,
        F2I,
        F2L,
        F2D,
        D2I,
        D2L,
        D2F,
        I2B,
        I2C,
        I2S,
        LCmp,
        FCmp(CompareMode::L),
        FCmp(CompareMode::G),
    ]
};

fn simple_instruction(mnemonic: &str) -> Option<Instruction> {
    use Instruction::*;
    let extra = [
        DCmp(CompareMode::L),
        DCmp(CompareMode::G),
        ArrayLength,
        MonitorEnter,
        MonitorExit,
    ];
    SIMPLE_INSTRUCTIONS
        .iter()
        .chain(extra.iter())
        .find(|insn| insn.mnemonic() == mnemonic)
        .cloned()
}

fn simple_branch(mnemonic: &str) -> Option<BranchInstruction> {
    use BranchInstruction::*;
    let branch = match mnemonic {
        "ireturn" => IReturn,
        "lreturn" => LReturn,
        "freturn" => FReturn,
        "dreturn" => DReturn,
        "areturn" => AReturn,
        "return" => Return,
        "athrow" => AThrow,
        _ => return None,
    };
    Some(branch)
}

fn ord_comparison(suffix: &str) -> Option<OrdComparison> {
    let cmp = match suffix {
        "eq" => OrdComparison::EQ,
        "ne" => OrdComparison::NE,
        "lt" => OrdComparison::LT,
        "ge" => OrdComparison::GE,
        "gt" => OrdComparison::GT,
        "le" => OrdComparison::LE,
        _ => return None,
    };
    Some(cmp)
}

fn is_branch_mnemonic(mnemonic: &str) -> bool {
    simple_branch(mnemonic).is_some()
        || matches!(
            mnemonic,
            "goto"
                | "ifnull"
                | "ifnonnull"
                | "if_acmpeq"
                | "if_acmpne"
                | "tableswitch"
                | "lookupswitch"
        )
        || mnemonic
            .strip_prefix("if_icmp")
            .or_else(|| mnemonic.strip_prefix("if"))
            .map_or(false, |suffix| ord_comparison(suffix).is_some())
}

/// Parsing state for one listing
struct Parser {
    line_no: usize,
    owner: String,
    method: Option<(MethodAccessFlags, String, MethodDescriptor)>,
    instructions: InsnList,
    labels: HashMap<String, InsnId>,
    pending_branches: Vec<(usize, InsnId, Vec<Token>)>,
    pending_try_catch: Vec<(usize, Vec<Token>)>,
    max_locals: Option<usize>,
    max_stack: Option<usize>,
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> Error {
        listing_error(self.line_no, message)
    }

    fn operand<'t>(&self, tokens: &'t [Token], index: usize) -> Result<&'t str, Error> {
        match tokens.get(index) {
            Some(token) => Ok(&token.text),
            None => Err(self.error(format!(
                "`{}` is missing an operand",
                tokens.first().map_or("", |t| t.text.as_str())
            ))),
        }
    }

    fn number<N: std::str::FromStr>(&self, text: &str) -> Result<N, Error> {
        text.parse()
            .map_err(|_| self.error(format!("invalid number `{}`", text)))
    }

    fn parse_line(&mut self, tokens: Vec<Token>) -> Result<(), Error> {
        let head = tokens[0].text.as_str();

        if tokens.len() == 1 && !tokens[0].quoted {
            if let Some(name) = head.strip_suffix(':') {
                if self.labels.contains_key(name) {
                    return Err(self.error(format!("label `{}` is defined twice", name)));
                }
                let id = self.instructions.push_label();
                self.labels.insert(name.to_owned(), id);
                return Ok(());
            }
        }

        match head {
            "class" => self.owner = self.operand(&tokens, 1)?.to_owned(),
            "method" => self.parse_header(&tokens)?,
            "maxlocals" => self.max_locals = Some(self.number(self.operand(&tokens, 1)?)?),
            "maxstack" => self.max_stack = Some(self.number(self.operand(&tokens, 1)?)?),
            "line" => {
                let line = self.number(self.operand(&tokens, 1)?)?;
                self.instructions.push_back(Node::Line(line));
            }
            "try" => self.pending_try_catch.push((self.line_no, tokens)),
            mnemonic if is_branch_mnemonic(mnemonic) => {
                // Targets may be defined further down, so resolve jumps at the end
                let placeholder = self.instructions.push_label();
                self.pending_branches
                    .push((self.line_no, placeholder, tokens));
            }
            _ => {
                let insn = self.parse_instruction(&tokens)?;
                self.instructions.push_insn(insn);
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, tokens: &[Token]) -> Result<(), Error> {
        if tokens.len() < 3 {
            return Err(self.error("expected `method [FLAGS] NAME DESCRIPTOR`"));
        }
        let mut flags = MethodAccessFlags::empty();
        for token in &tokens[1..tokens.len() - 2] {
            flags |= MethodAccessFlags::from_modifier(&token.text).ok_or_else(|| {
                self.error(format!("unknown method modifier `{}`", token.text))
            })?;
        }
        let name = tokens[tokens.len() - 2].text.clone();
        let descriptor = MethodDescriptor::parse(&tokens[tokens.len() - 1].text)
            .map_err(|err| self.error(err.to_string()))?;
        self.method = Some((flags, name, descriptor));
        Ok(())
    }

    fn parse_member(&self, text: &str) -> Result<(String, String), Error> {
        match text.rsplit_once('.') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok((owner.to_owned(), name.to_owned()))
            }
            _ => Err(self.error(format!("expected `owner.name`, found `{}`", text))),
        }
    }

    fn parse_field(&self, tokens: &[Token]) -> Result<FieldRef, Error> {
        let (owner, name) = self.parse_member(self.operand(tokens, 1)?)?;
        let descriptor = FieldType::parse(self.operand(tokens, 2)?)
            .map_err(|err| self.error(err.to_string()))?;
        Ok(FieldRef::new(owner, name, descriptor))
    }

    fn parse_method_ref(&self, tokens: &[Token]) -> Result<MethodRef, Error> {
        let (owner, name) = self.parse_member(self.operand(tokens, 1)?)?;
        let descriptor = MethodDescriptor::parse(self.operand(tokens, 2)?)
            .map_err(|err| self.error(err.to_string()))?;
        Ok(MethodRef::new(owner, name, descriptor))
    }

    fn parse_ref_type(&self, text: &str) -> Result<RefType, Error> {
        RefType::from_internal_name(text).map_err(|err| self.error(err.to_string()))
    }

    fn parse_constant(&self, tokens: &[Token]) -> Result<Constant, Error> {
        let token = tokens
            .get(1)
            .ok_or_else(|| self.error("`ldc` is missing an operand"))?;
        if token.quoted {
            return Ok(Constant::String(token.text.clone()));
        }
        let text = token.text.as_str();
        if text == "class" {
            return Ok(Constant::Class(self.parse_ref_type(self.operand(tokens, 2)?)?));
        }
        let constant = if let Some(long) = text.strip_suffix('L') {
            Constant::Long(self.number(long)?)
        } else if let Some(float) = text.strip_suffix('f') {
            Constant::Float(self.number(float)?)
        } else if let Some(double) = text.strip_suffix('d') {
            Constant::Double(self.number(double)?)
        } else {
            Constant::Integer(self.number(text)?)
        };
        Ok(constant)
    }

    fn parse_instruction(&self, tokens: &[Token]) -> Result<Instruction, Error> {
        use Instruction::*;
        let mnemonic = tokens[0].text.as_str();
        if let Some(insn) = simple_instruction(mnemonic) {
            return Ok(insn);
        }
        let slot = |idx| -> Result<u16, Error> { self.number(self.operand(tokens, idx)?) };
        let insn = match mnemonic {
            "bipush" => BiPush(self.number(self.operand(tokens, 1)?)?),
            "sipush" => SiPush(self.number(self.operand(tokens, 1)?)?),
            "ldc" | "ldc_w" | "ldc2_w" => Ldc(self.parse_constant(tokens)?),
            "iload" => ILoad(slot(1)?),
            "lload" => LLoad(slot(1)?),
            "fload" => FLoad(slot(1)?),
            "dload" => DLoad(slot(1)?),
            "aload" => ALoad(slot(1)?),
            "istore" => IStore(slot(1)?),
            "lstore" => LStore(slot(1)?),
            "fstore" => FStore(slot(1)?),
            "dstore" => DStore(slot(1)?),
            "astore" => AStore(slot(1)?),
            "iinc" => IInc(slot(1)?, self.number(self.operand(tokens, 2)?)?),
            "getstatic" => GetStatic(self.parse_field(tokens)?),
            "putstatic" => PutStatic(self.parse_field(tokens)?),
            "getfield" => GetField(self.parse_field(tokens)?),
            "putfield" => PutField(self.parse_field(tokens)?),
            "invokevirtual" => Invoke(InvokeType::Virtual, self.parse_method_ref(tokens)?),
            "invokespecial" => Invoke(InvokeType::Special, self.parse_method_ref(tokens)?),
            "invokestatic" => Invoke(InvokeType::Static, self.parse_method_ref(tokens)?),
            "invokeinterface" => Invoke(InvokeType::Interface, self.parse_method_ref(tokens)?),
            "invokedynamic" => InvokeDynamic(IndyRef {
                name: self.operand(tokens, 1)?.to_owned(),
                descriptor: MethodDescriptor::parse(self.operand(tokens, 2)?)
                    .map_err(|err| self.error(err.to_string()))?,
                bootstrap: self.operand(tokens, 3)?.to_owned(),
            }),
            "new" => New(self.operand(tokens, 1)?.to_owned()),
            "newarray" => {
                let name = self.operand(tokens, 1)?;
                let base = [
                    BaseType::Boolean,
                    BaseType::Char,
                    BaseType::Float,
                    BaseType::Double,
                    BaseType::Byte,
                    BaseType::Short,
                    BaseType::Int,
                    BaseType::Long,
                ]
                .into_iter()
                .find(|base| base.java_name() == name)
                .ok_or_else(|| self.error(format!("invalid array element type `{}`", name)))?;
                NewArray(base)
            }
            "anewarray" => ANewArray(self.parse_ref_type(self.operand(tokens, 1)?)?),
            "checkcast" => CheckCast(self.parse_ref_type(self.operand(tokens, 1)?)?),
            "instanceof" => InstanceOf(self.parse_ref_type(self.operand(tokens, 1)?)?),
            "multianewarray" => MultiANewArray(
                self.parse_ref_type(self.operand(tokens, 1)?)?,
                self.number(self.operand(tokens, 2)?)?,
            ),
            other => return Err(self.error(format!("unknown instruction `{}`", other))),
        };
        Ok(insn)
    }

    fn label(&self, name: &str) -> Result<InsnId, Error> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| self.error(format!("undefined label `{}`", name)))
    }

    fn parse_branch(&self, tokens: &[Token]) -> Result<BranchInstruction, Error> {
        use BranchInstruction::*;
        let mnemonic = tokens[0].text.as_str();
        if let Some(branch) = simple_branch(mnemonic) {
            return Ok(branch);
        }
        let target = || -> Result<InsnId, Error> { self.label(self.operand(tokens, 1)?) };
        let branch = match mnemonic {
            "goto" => Goto(target()?),
            "ifnull" => IfNull(EqComparison::EQ, target()?),
            "ifnonnull" => IfNull(EqComparison::NE, target()?),
            "if_acmpeq" => IfACmp(EqComparison::EQ, target()?),
            "if_acmpne" => IfACmp(EqComparison::NE, target()?),
            "tableswitch" => {
                let low = self.number(self.operand(tokens, 1)?)?;
                let (cases, default) = self.switch_cases(&tokens[2..])?;
                let targets = cases
                    .iter()
                    .map(|name| self.label(name))
                    .collect::<Result<_, _>>()?;
                TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            "lookupswitch" => {
                let (cases, default) = self.switch_cases(&tokens[1..])?;
                let mut targets = vec![];
                for case in cases {
                    let (key, name) = case
                        .split_once(':')
                        .ok_or_else(|| {
                            self.error(format!("expected `KEY:LABEL`, found `{}`", case))
                        })?;
                    targets.push((self.number(key)?, self.label(name)?));
                }
                targets.sort_by_key(|(key, _)| *key);
                LookupSwitch { default, targets }
            }
            other => {
                if let Some(cmp) = other.strip_prefix("if_icmp").and_then(ord_comparison) {
                    IfICmp(cmp, target()?)
                } else if let Some(cmp) = other.strip_prefix("if").and_then(ord_comparison) {
                    If(cmp, target()?)
                } else {
                    return Err(self.error(format!("unknown branch instruction `{}`", other)));
                }
            }
        };
        Ok(branch)
    }

    /// Split `CASE.. default LABEL` into the cases and the resolved default
    fn switch_cases<'t>(&self, tokens: &'t [Token]) -> Result<(Vec<&'t str>, InsnId), Error> {
        match tokens {
            [cases @ .., kw, default] if kw.text == "default" => Ok((
                cases.iter().map(|t| t.text.as_str()).collect(),
                self.label(&default.text)?,
            )),
            _ => Err(self.error("switch is missing `default LABEL`")),
        }
    }

    fn parse_try_catch(&self, tokens: &[Token]) -> Result<TryCatchBlock, Error> {
        let start = self.label(self.operand(tokens, 1)?)?;
        let end = self.label(self.operand(tokens, 2)?)?;
        let handler = self.label(self.operand(tokens, 3)?)?;
        let exception = match self.operand(tokens, 4)? {
            "*" => None,
            class => Some(class.to_owned()),
        };
        Ok(TryCatchBlock::new(start, end, handler, exception))
    }

    fn finish(mut self) -> Result<MethodCode, Error> {
        let pending = std::mem::take(&mut self.pending_branches);
        for (line_no, placeholder, tokens) in pending {
            self.line_no = line_no;
            let branch = self.parse_branch(&tokens)?;
            *self.instructions.node_mut(placeholder) = Node::Branch(branch);
        }

        let mut try_catch_blocks = vec![];
        let pending = std::mem::take(&mut self.pending_try_catch);
        for (line_no, tokens) in pending {
            self.line_no = line_no;
            try_catch_blocks.push(self.parse_try_catch(&tokens)?);
        }

        let (access_flags, name, descriptor) = self
            .method
            .take()
            .ok_or_else(|| listing_error(0, "missing `method` header"))?;
        let mut method = MethodCode::new(self.owner, name, descriptor, access_flags);
        method.instructions = self.instructions;
        method.try_catch_blocks = try_catch_blocks;

        let used_locals = method
            .instructions
            .iter()
            .filter_map(|id| method.instructions.insn(id)?.local_slot())
            .map(|(slot, width)| slot as usize + width)
            .max()
            .unwrap_or(0);
        method.max_locals = self
            .max_locals
            .unwrap_or_else(|| method.max_locals.max(used_locals));
        method.max_stack = self.max_stack.unwrap_or(0);
        Ok(method)
    }
}

/// Parse a method from its listing
pub fn parse_method(source: &str) -> Result<MethodCode, Error> {
    let mut parser = Parser {
        line_no: 0,
        owner: String::new(),
        method: None,
        instructions: InsnList::new(),
        labels: HashMap::new(),
        pending_branches: vec![],
        pending_try_catch: vec![],
        max_locals: None,
        max_stack: None,
    };
    for (idx, line) in source.lines().enumerate() {
        parser.line_no = idx + 1;
        let tokens = tokenize(parser.line_no, line)?;
        if !tokens.is_empty() {
            parser.parse_line(tokens)?;
        }
    }
    parser.finish()
}

/// Parse a bare sequence of instructions (no header) into a list
///
/// Handy for snippet bodies and tests, where only the code matters.
pub fn parse_instructions(source: &str) -> Result<(InsnList, Vec<TryCatchBlock>), Error> {
    let method = parse_method(&format!("method static code ()V\n{}", source))?;
    Ok((method.instructions, method.try_catch_blocks))
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Integer(i) => i.to_string(),
        Constant::Long(l) => format!("{}L", l),
        Constant::Float(f) => format!("{:?}f", f),
        Constant::Double(d) => format!("{:?}d", d),
        Constant::String(s) => format!("{:?}", s),
        Constant::Class(cls) => format!("class {}", cls.internal_name()),
    }
}

/// Render a real node: instructions in full, branches by mnemonic only (labels and line markers
/// render as nothing)
pub fn render_node(node: &Node) -> Option<String> {
    match node {
        Node::Insn(insn) => Some(render_instruction(insn)),
        Node::Branch(branch) => Some(branch.mnemonic().to_owned()),
        Node::Label | Node::Line(_) => None,
    }
}

/// Render one instruction (without the label names a branch refers to)
pub fn render_instruction(insn: &Instruction) -> String {
    use Instruction::*;
    let mnemonic = insn.mnemonic();
    match insn {
        BiPush(i) => format!("{} {}", mnemonic, i),
        SiPush(i) => format!("{} {}", mnemonic, i),
        Ldc(constant) => format!("{} {}", mnemonic, render_constant(constant)),
        ILoad(s) | LLoad(s) | FLoad(s) | DLoad(s) | ALoad(s) | IStore(s) | LStore(s)
        | FStore(s) | DStore(s) | AStore(s) => format!("{} {}", mnemonic, s),
        IInc(s, i) => format!("{} {} {}", mnemonic, s, i),
        GetStatic(f) | PutStatic(f) | GetField(f) | PutField(f) => format!(
            "{} {}",
            mnemonic,
            crate::jvm::render_member(&f.owner, &f.name, &f.descriptor)
        ),
        Invoke(_, m) => format!(
            "{} {}",
            mnemonic,
            crate::jvm::render_member(&m.owner, &m.name, &m.descriptor)
        ),
        InvokeDynamic(indy) => format!(
            "{} {} {} {}",
            mnemonic,
            indy.name,
            indy.descriptor.render(),
            indy.bootstrap
        ),
        New(cls) => format!("{} {}", mnemonic, cls),
        NewArray(base) => format!("{} {}", mnemonic, base.java_name()),
        ANewArray(typ) | CheckCast(typ) | InstanceOf(typ) => {
            format!("{} {}", mnemonic, typ.internal_name())
        }
        MultiANewArray(typ, dims) => format!("{} {} {}", mnemonic, typ.internal_name(), dims),
        _ => mnemonic.to_owned(),
    }
}

/// Print a list of nodes in listing form
///
/// Labels are named `L0`, `L1`, ... in order of appearance. References to nodes that are not
/// labels of the list get printed as `?N` so that broken code still renders.
pub fn print_instructions(
    instructions: &InsnList,
    try_catch_blocks: &[TryCatchBlock],
) -> String {
    let mut names: HashMap<InsnId, String> = HashMap::new();
    for id in instructions {
        if instructions.node(id).is_label() {
            let name = format!("L{}", names.len());
            names.insert(id, name);
        }
    }
    let name = |id: InsnId| -> String {
        names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("?{}", id.0))
    };

    let mut out = String::new();
    for id in instructions {
        match instructions.node(id) {
            Node::Label => {
                let _ = writeln!(out, "{}:", name(id));
            }
            Node::Line(line) => {
                let _ = writeln!(out, "  line {}", line);
            }
            Node::Insn(insn) => {
                let _ = writeln!(out, "  {}", render_instruction(insn));
            }
            Node::Branch(branch) => {
                let mnemonic = branch.mnemonic();
                let rendered = match branch {
                    BranchInstruction::TableSwitch {
                        default,
                        low,
                        targets,
                    } => {
                        let cases: Vec<String> = targets.iter().map(|t| name(*t)).collect();
                        format!(
                            "{} {} {} default {}",
                            mnemonic,
                            low,
                            cases.join(" "),
                            name(*default)
                        )
                    }
                    BranchInstruction::LookupSwitch { default, targets } => {
                        let cases: Vec<String> = targets
                            .iter()
                            .map(|(key, t)| format!("{}:{}", key, name(*t)))
                            .collect();
                        format!("{} {} default {}", mnemonic, cases.join(" "), name(*default))
                    }
                    other => match other.jump_targets().first() {
                        Some(target) => format!("{} {}", mnemonic, name(*target)),
                        None => mnemonic.to_owned(),
                    },
                };
                let _ = writeln!(out, "  {}", rendered.replace("  ", " "));
            }
        }
    }
    for tcb in try_catch_blocks {
        let _ = writeln!(
            out,
            "try {} {} {} {}",
            name(tcb.start),
            name(tcb.end),
            name(tcb.handler),
            tcb.exception.as_deref().unwrap_or("*")
        );
    }
    out
}

/// Print a method in listing form (parsing the output gives back an equivalent method)
pub fn print_method(method: &MethodCode) -> String {
    let mut out = String::new();
    if !method.owner.is_empty() {
        let _ = writeln!(out, "class {}", method.owner);
    }
    out.push_str("method");
    for (flag, keyword) in MethodAccessFlags::MODIFIERS {
        if method.access_flags.contains(flag) {
            out.push(' ');
            out.push_str(keyword);
        }
    }
    let _ = writeln!(out, " {} {}", method.name, method.descriptor.render());
    out.push_str(&print_instructions(
        &method.instructions,
        &method.try_catch_blocks,
    ));
    let _ = writeln!(out, "maxlocals {}", method.max_locals);
    let _ = writeln!(out, "maxstack {}", method.max_stack);
    out
}
