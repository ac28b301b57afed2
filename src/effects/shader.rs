//! A tiny per-pixel expression language for custom filters.
//!
//! ```text
//! l = luma(r, g, b);
//! r = mix(r, l, strength);
//! g = mix(g, l, strength) * 0.9;
//! b = b + 0.1 * sin(time + x * 6.28);
//! ```
//!
//! Programs are compiled once to stack bytecode when the filter is created,
//! so syntax errors surface before the filter reaches the pipeline. Inputs
//! are `r g b a` (0..1), `x y` (0..1 across the frame), `width height`
//! (pixels), `time` (seconds), `intensity` and any numeric filter param by
//! name. After the program runs, `r g b` are written back.

use crate::effects::error::{EffectError, Result};
use crate::effects::filter::{FilterKind, FrameFilter, Params};
use crate::effects::FrameContext;
use crate::frame::{unit_to_u8, FrameBuffer};

const INPUTS: [&str; 10] = [
    "r",
    "g",
    "b",
    "a",
    "x",
    "y",
    "width",
    "height",
    "time",
    "intensity",
];
const MAX_SOURCE_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Builtin {
    Min,
    Max,
    Clamp,
    Mix,
    Abs,
    Sqrt,
    Pow,
    Sin,
    Cos,
    Floor,
    Fract,
    Step,
    Smoothstep,
    Luma,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Self::Min,
            "max" => Self::Max,
            "clamp" => Self::Clamp,
            "mix" => Self::Mix,
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "pow" => Self::Pow,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "floor" => Self::Floor,
            "fract" => Self::Fract,
            "step" => Self::Step,
            "smoothstep" => Self::Smoothstep,
            "luma" => Self::Luma,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Self::Abs | Self::Sqrt | Self::Sin | Self::Cos | Self::Floor | Self::Fract => 1,
            Self::Min | Self::Max | Self::Pow | Self::Step => 2,
            Self::Clamp | Self::Mix | Self::Smoothstep | Self::Luma => 3,
        }
    }

    fn eval(self, stack: &mut Vec<f32>) {
        let mut pop = || stack.pop().unwrap_or(0.0);
        let value = match self.arity() {
            1 => {
                let a = pop();
                match self {
                    Self::Abs => a.abs(),
                    Self::Sqrt => a.max(0.0).sqrt(),
                    Self::Sin => a.sin(),
                    Self::Cos => a.cos(),
                    Self::Floor => a.floor(),
                    _ => a - a.floor(),
                }
            }
            2 => {
                let b = pop();
                let a = pop();
                match self {
                    Self::Min => a.min(b),
                    Self::Max => a.max(b),
                    Self::Pow => a.abs().powf(b),
                    _ => {
                        if b < a {
                            0.0
                        } else {
                            1.0
                        }
                    }
                }
            }
            _ => {
                let c = pop();
                let b = pop();
                let a = pop();
                match self {
                    Self::Clamp => a.max(b).min(c),
                    Self::Mix => a + (b - a) * c,
                    Self::Smoothstep => {
                        let t = ((c - a) / (b - a)).clamp(0.0, 1.0);
                        t * t * (3.0 - 2.0 * t)
                    }
                    _ => 0.299 * a + 0.587 * b + 0.114 * c,
                }
            }
        };
        stack.push(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Const(f32),
    Load(u16),
    Store(u16),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Call(Builtin),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f32),
    Ident(String),
    Sym(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

fn shader_error(line: usize, column: usize, message: impl Into<String>) -> EffectError {
    EffectError::Shader {
        line,
        column,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    const SYMBOLS: [&str; 16] = [
        "<=", ">=", "==", "!=", "+", "-", "*", "/", "%", "(", ")", ",", ";", "=", "<", ">",
    ];

    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let (mut i, mut line, mut column) = (0usize, 1usize, 1usize);

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            i += 1;
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            column += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let start_col = column;
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            column += i - start;
            let value = text
                .parse::<f32>()
                .map_err(|_| shader_error(line, start_col, format!("bad number {text}")))?;
            tokens.push(Token {
                tok: Tok::Num(value),
                line,
                column: start_col,
            });
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            column += i - start;
            tokens.push(Token {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                line,
                column: start_col,
            });
            continue;
        }

        let rest: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let symbol = SYMBOLS
            .iter()
            .find(|s| rest.starts_with(**s))
            .ok_or_else(|| shader_error(line, column, format!("unexpected character {c:?}")))?;
        i += symbol.len();
        column += symbol.len();
        tokens.push(Token {
            tok: Tok::Sym(symbol),
            line,
            column: start_col,
        });
    }

    tokens.push(Token {
        tok: Tok::Eof,
        line,
        column,
    });
    Ok(tokens)
}

/// Recursive-descent compiler emitting bytecode as it parses.
struct Compiler {
    tokens: Vec<Token>,
    pos: usize,
    slots: Vec<String>,
    code: Vec<Op>,
}

impl Compiler {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> EffectError {
        let token = self.peek();
        shader_error(token.line, token.column, message)
    }

    fn eat(&mut self, symbol: &str) -> bool {
        if matches!(&self.peek().tok, Tok::Sym(s) if *s == symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: &str) -> Result<()> {
        if self.eat(symbol) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{symbol}'")))
        }
    }

    fn slot(&self, name: &str) -> Option<u16> {
        self.slots.iter().position(|s| s == name).map(|i| i as u16)
    }

    fn program(&mut self) -> Result<()> {
        while self.peek().tok != Tok::Eof {
            self.statement()?;
            if !self.eat(";") && self.peek().tok != Tok::Eof {
                return Err(self.error_here("expected ';'"));
            }
            while self.eat(";") {}
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<()> {
        let token = self.advance();
        let Tok::Ident(name) = token.tok else {
            return Err(shader_error(token.line, token.column, "expected an assignment"));
        };
        if Builtin::lookup(&name).is_some() {
            return Err(shader_error(
                token.line,
                token.column,
                format!("cannot assign to function {name}"),
            ));
        }
        self.expect("=")?;
        self.expression()?;
        let slot = match self.slot(&name) {
            Some(slot) => slot,
            None => {
                self.slots.push(name);
                (self.slots.len() - 1) as u16
            }
        };
        self.code.push(Op::Store(slot));
        Ok(())
    }

    fn expression(&mut self) -> Result<()> {
        self.additive()?;
        let op = match &self.peek().tok {
            Tok::Sym("<") => Op::Lt,
            Tok::Sym("<=") => Op::Le,
            Tok::Sym(">") => Op::Gt,
            Tok::Sym(">=") => Op::Ge,
            Tok::Sym("==") => Op::Eq,
            Tok::Sym("!=") => Op::Ne,
            _ => return Ok(()),
        };
        self.advance();
        self.additive()?;
        self.code.push(op);
        Ok(())
    }

    fn additive(&mut self) -> Result<()> {
        self.multiplicative()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Sym("+") => Op::Add,
                Tok::Sym("-") => Op::Sub,
                _ => return Ok(()),
            };
            self.advance();
            self.multiplicative()?;
            self.code.push(op);
        }
    }

    fn multiplicative(&mut self) -> Result<()> {
        self.unary()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Sym("*") => Op::Mul,
                Tok::Sym("/") => Op::Div,
                Tok::Sym("%") => Op::Rem,
                _ => return Ok(()),
            };
            self.advance();
            self.unary()?;
            self.code.push(op);
        }
    }

    fn unary(&mut self) -> Result<()> {
        if self.eat("-") {
            self.unary()?;
            self.code.push(Op::Neg);
            return Ok(());
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<()> {
        let token = self.advance();
        match token.tok {
            Tok::Num(value) => {
                self.code.push(Op::Const(value));
                Ok(())
            }
            Tok::Sym("(") => {
                self.expression()?;
                self.expect(")")
            }
            Tok::Ident(name) => {
                if self.eat("(") {
                    let builtin = Builtin::lookup(&name).ok_or_else(|| {
                        shader_error(token.line, token.column, format!("unknown function {name}"))
                    })?;
                    let mut argc = 0;
                    if !self.eat(")") {
                        loop {
                            self.expression()?;
                            argc += 1;
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    if argc != builtin.arity() {
                        return Err(shader_error(
                            token.line,
                            token.column,
                            format!("{name} takes {} arguments, got {argc}", builtin.arity()),
                        ));
                    }
                    self.code.push(Op::Call(builtin));
                    return Ok(());
                }
                let slot = self.slot(&name).ok_or_else(|| {
                    shader_error(token.line, token.column, format!("unknown variable {name}"))
                })?;
                self.code.push(Op::Load(slot));
                Ok(())
            }
            Tok::Eof => Err(shader_error(token.line, token.column, "unexpected end of input")),
            Tok::Sym(s) => Err(shader_error(
                token.line,
                token.column,
                format!("unexpected '{s}'"),
            )),
        }
    }
}

/// Compiled shader program.
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<Op>,
    slot_count: usize,
    /// Initial register values for params, by slot.
    params: Vec<(usize, f32)>,
}

impl Program {
    /// Compile `source` with the numeric entries of `params` as inputs.
    pub fn compile(source: &str, params: &Params) -> Result<Self> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(shader_error(1, 1, "shader source too long"));
        }
        let mut slots: Vec<String> = INPUTS.iter().map(|s| s.to_string()).collect();
        let mut initial = Vec::new();
        for (name, value) in params {
            if INPUTS.contains(&name.as_str()) {
                continue;
            }
            if let Some(n) = value.as_number() {
                initial.push((slots.len(), n));
                slots.push(name.clone());
            }
        }

        let mut compiler = Compiler {
            tokens: tokenize(source)?,
            pos: 0,
            slots,
            code: Vec::new(),
        };
        compiler.program()?;
        if compiler.code.is_empty() {
            return Err(shader_error(1, 1, "shader has no statements"));
        }

        Ok(Self {
            code: compiler.code,
            slot_count: compiler.slots.len(),
            params: initial,
        })
    }

    fn run(&self, regs: &mut [f32], stack: &mut Vec<f32>) {
        stack.clear();
        for op in &self.code {
            match *op {
                Op::Const(v) => stack.push(v),
                Op::Load(slot) => stack.push(regs[slot as usize]),
                Op::Store(slot) => regs[slot as usize] = stack.pop().unwrap_or(0.0),
                Op::Neg => {
                    let a = stack.pop().unwrap_or(0.0);
                    stack.push(-a);
                }
                Op::Call(builtin) => builtin.eval(stack),
                binary => {
                    let b = stack.pop().unwrap_or(0.0);
                    let a = stack.pop().unwrap_or(0.0);
                    let truth = |c: bool| if c { 1.0 } else { 0.0 };
                    stack.push(match binary {
                        Op::Add => a + b,
                        Op::Sub => a - b,
                        Op::Mul => a * b,
                        Op::Div => {
                            if b == 0.0 {
                                0.0
                            } else {
                                a / b
                            }
                        }
                        Op::Rem => {
                            if b == 0.0 {
                                0.0
                            } else {
                                a.rem_euclid(b)
                            }
                        }
                        Op::Lt => truth(a < b),
                        Op::Le => truth(a <= b),
                        Op::Gt => truth(a > b),
                        Op::Ge => truth(a >= b),
                        Op::Eq => truth(a == b),
                        _ => truth(a != b),
                    });
                }
            }
        }
    }
}

pub struct CustomShaderFilter {
    program: Program,
}

impl CustomShaderFilter {
    pub fn compile(source: &str, params: &Params) -> Result<Self> {
        Ok(Self {
            program: Program::compile(source, params)?,
        })
    }
}

impl FrameFilter for CustomShaderFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::CustomShader
    }

    fn apply(&self, frame: &mut FrameBuffer, ctx: &FrameContext<'_>) {
        let (width, height) = (frame.width(), frame.height());
        let mut base = vec![0.0f32; self.program.slot_count];
        base[6] = width as f32;
        base[7] = height as f32;
        base[8] = ctx.time_s;
        base[9] = 1.0;
        for &(slot, value) in &self.program.params {
            base[slot] = value;
        }

        let mut regs = base.clone();
        let mut stack = Vec::with_capacity(16);
        let (inv_w, inv_h) = (1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32);
        for (i, px) in frame.pixels_mut().iter_mut().enumerate() {
            regs.copy_from_slice(&base);
            let [r, g, b, a] = px.to_unit();
            regs[0] = r;
            regs[1] = g;
            regs[2] = b;
            regs[3] = a;
            regs[4] = ((i as u32 % width) as f32 + 0.5) * inv_w;
            regs[5] = ((i as u32 / width) as f32 + 0.5) * inv_h;
            self.program.run(&mut regs, &mut stack);
            px.r = unit_to_u8(regs[0]);
            px.g = unit_to_u8(regs[1]);
            px.b = unit_to_u8(regs[2]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::filter::ParamValue;
    use crate::frame::Rgba;

    fn run_on(source: &str, params: &Params, color: Rgba) -> Rgba {
        let filter = CustomShaderFilter::compile(source, params).unwrap();
        let mut frame = FrameBuffer::solid(2, 2, color, 0);
        filter.apply(&mut frame, &FrameContext::default());
        frame.pixel(0, 0)
    }

    #[test]
    fn inverts_colours() {
        let out = run_on(
            "r = 1 - r; g = 1 - g; b = 1 - b;",
            &Params::new(),
            Rgba::opaque(0, 255, 55),
        );
        assert_eq!(out, Rgba::opaque(255, 0, 200));
    }

    #[test]
    fn locals_params_and_builtins() {
        let mut params = Params::new();
        params.insert("strength".into(), ParamValue::Number(1.0));
        let out = run_on(
            "l = luma(r, g, b)\n; r = mix(r, l, strength); g = l; b = clamp(l * 2, 0, 1)",
            &params,
            Rgba::opaque(255, 0, 0),
        );
        // luma of pure red is 0.299.
        assert_eq!(out.r, 76);
        assert_eq!(out.g, 76);
        assert_eq!(out.b, 152);
    }

    #[test]
    fn precedence_and_comparisons() {
        let out = run_on(
            "r = 0.1 + 0.2 * 2; g = (0.1 + 0.2) * 2; b = r > g",
            &Params::new(),
            Rgba::opaque(0, 0, 0),
        );
        assert_eq!(out.r, unit_to_u8(0.5));
        assert_eq!(out.g, unit_to_u8(0.6));
        assert_eq!(out.b, 0);
    }

    #[test]
    fn unary_minus_and_division_by_zero() {
        let out = run_on("r = -(-0.5); g = 1 / 0; b = abs(-1)", &Params::new(), Rgba::default());
        assert_eq!(out.r, unit_to_u8(0.5));
        assert_eq!(out.g, 0);
        assert_eq!(out.b, 255);
    }

    #[test]
    fn coordinates_are_normalised() {
        let filter = CustomShaderFilter::compile("r = x; g = y; b = 0", &Params::new()).unwrap();
        let mut frame = FrameBuffer::solid(4, 2, Rgba::default(), 0);
        filter.apply(&mut frame, &FrameContext::default());
        assert_eq!(frame.pixel(0, 0).r, unit_to_u8(0.125));
        assert_eq!(frame.pixel(3, 1).r, unit_to_u8(0.875));
        assert_eq!(frame.pixel(3, 1).g, unit_to_u8(0.75));
    }

    #[test]
    fn reports_syntax_errors_with_position() {
        let err = Program::compile("r = 1 +;", &Params::new()).unwrap_err();
        assert!(matches!(err, EffectError::Shader { line: 1, .. }), "{err:?}");

        let err = Program::compile("r = g;\ng = oops", &Params::new()).unwrap_err();
        match err {
            EffectError::Shader { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("oops"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // A newline does not end a statement.
        let err = Program::compile("r = g\ng = b", &Params::new()).unwrap_err();
        match err {
            EffectError::Shader { line, message, .. } => {
                assert_eq!(line, 2);
                assert_eq!(message, "expected ';'");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_arity_and_unknown_functions() {
        assert!(Program::compile("r = min(1)", &Params::new()).is_err());
        assert!(Program::compile("r = blur(r)", &Params::new()).is_err());
        assert!(Program::compile("sin = 1", &Params::new()).is_err());
        assert!(Program::compile("", &Params::new()).is_err());
        assert!(Program::compile("r = 1 $ 2", &Params::new()).is_err());
    }

    #[test]
    fn comments_are_ignored() {
        let out = run_on("// tint\nr = 1; // full red\n", &Params::new(), Rgba::default());
        assert_eq!(out.r, 255);
    }
}
