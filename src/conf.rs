//! A small typed tree for block-structured server configuration,
//! formatted either as Nginx (`name args { ... }`, `;`-terminated
//! directives) or Apache (`<Name args> ... </Name>`).
//!
//! Optional sections are simply not added to the tree, so formatting
//! never emits empty or half-filled blocks.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Nginx,
    Apache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
}

impl Directive {
    #[must_use]
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Directive(Directive),
    Block(Block),
    Comment(String),
    Blank,
}

impl Item {
    fn directives(&self) -> Box<dyn Iterator<Item = &Directive> + '_> {
        match self {
            Self::Directive(d) => Box::new(std::iter::once(d)),
            Self::Block(b) => b.directives(),
            Self::Comment(_) | Self::Blank => Box::new(std::iter::empty()),
        }
    }

    fn blocks(&self) -> Box<dyn Iterator<Item = &Block> + '_> {
        match self {
            Self::Block(b) => b.blocks(),
            _ => Box::new(std::iter::empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub args: Vec<String>,
    pub items: Vec<Item>,
}

impl Block {
    #[must_use]
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn directive(mut self, name: &str, args: &[&str]) -> Self {
        self.items.push(Item::Directive(Directive::new(name, args)));
        self
    }

    #[must_use]
    pub fn block(mut self, block: Self) -> Self {
        self.items.push(Item::Block(block));
        self
    }

    #[must_use]
    pub fn comment(mut self, text: &str) -> Self {
        self.items.push(Item::Comment(text.to_string()));
        self
    }

    #[must_use]
    pub fn blank(mut self) -> Self {
        self.items.push(Item::Blank);
        self
    }

    /// Every directive in this block and its descendants.
    pub fn directives(&self) -> Box<dyn Iterator<Item = &Directive> + '_> {
        Box::new(self.items.iter().flat_map(Item::directives))
    }

    /// This block and every nested block, depth first.
    pub fn blocks(&self) -> Box<dyn Iterator<Item = &Self> + '_> {
        Box::new(std::iter::once(self).chain(self.items.iter().flat_map(Item::blocks)))
    }

    #[must_use]
    pub fn has_directive(&self, name: &str) -> bool {
        self.directives().any(|d| d.name.eq_ignore_ascii_case(name))
    }
}

/// A whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub syntax: Syntax,
    pub header: Vec<String>,
    pub blocks: Vec<Block>,
}

impl Config {
    #[must_use]
    pub const fn new(syntax: Syntax) -> Self {
        Self {
            syntax,
            header: Vec::new(),
            blocks: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, line: &str) -> Self {
        self.header.push(line.to_string());
        self
    }

    #[must_use]
    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().flat_map(Block::blocks)
    }

    pub fn all_directives(&self) -> impl Iterator<Item = &Directive> {
        self.blocks.iter().flat_map(Block::directives)
    }

    #[must_use]
    pub fn has_directive(&self, name: &str) -> bool {
        self.blocks.iter().any(|b| b.has_directive(name))
    }
}

/// Format a configuration tree as text.
#[must_use]
pub fn format(config: &Config) -> String {
    let mut out = String::new();
    for line in &config.header {
        let _ = writeln!(out, "# {line}");
    }
    for (i, block) in config.blocks.iter().enumerate() {
        if i > 0 || !config.header.is_empty() {
            out.push('\n');
        }
        format_block(&mut out, config.syntax, block, 0);
    }
    out
}

fn format_block(out: &mut String, syntax: Syntax, block: &Block, depth: usize) {
    let pad = "    ".repeat(depth);
    let head = join_head(&block.name, &block.args);
    match syntax {
        Syntax::Nginx => {
            let _ = writeln!(out, "{pad}{head} {{");
        }
        Syntax::Apache => {
            let _ = writeln!(out, "{pad}<{head}>");
        }
    }

    for item in &block.items {
        format_item(out, syntax, item, depth + 1);
    }

    match syntax {
        Syntax::Nginx => {
            let _ = writeln!(out, "{pad}}}");
        }
        Syntax::Apache => {
            let _ = writeln!(out, "{pad}</{}>", block.name);
        }
    }
}

fn format_item(out: &mut String, syntax: Syntax, item: &Item, depth: usize) {
    let pad = "    ".repeat(depth);
    match item {
        Item::Directive(d) => {
            let line = join_head(&d.name, &d.args);
            match syntax {
                Syntax::Nginx => {
                    let _ = writeln!(out, "{pad}{line};");
                }
                Syntax::Apache => {
                    let _ = writeln!(out, "{pad}{line}");
                }
            }
        }
        Item::Block(b) => format_block(out, syntax, b, depth),
        Item::Comment(text) => {
            let _ = writeln!(out, "{pad}# {text}");
        }
        Item::Blank => out.push('\n'),
    }
}

fn join_head(name: &str, args: &[String]) -> String {
    if args.is_empty() {
        name.to_string()
    } else {
        format!("{name} {}", args.join(" "))
    }
}
