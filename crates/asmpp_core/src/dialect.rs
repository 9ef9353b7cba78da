/// How scope prologues and epilogues are spelled in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScopeMarkers {
    /// `#define scope NAME` + `NAME:` ... `#undef scope`, for output that is
    /// run through the C preprocessor before assembly.
    #[default]
    Cpp,
    /// `.fn NAME` ... `.endfn`, for assemblers with a function macro pair.
    Fn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineClass {
    Instruction,
    Pseudo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dialect {
    pub scope_separator: String,
    pub local_prefix: String,
    pub pseudo_prefix: String,
    /// Mnemonics containing this are macro calls and take no immediate marker.
    pub pseudo_infix: String,
    pub immediate_marker: String,
    /// `{name}` is replaced by the sigil's bare name.
    pub argument_template: String,
    pub variable_template: String,
    pub anon_prefix: String,
    pub markers: ScopeMarkers,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            scope_separator: "$".to_string(),
            local_prefix: ".".to_string(),
            pseudo_prefix: ".".to_string(),
            pseudo_infix: "__".to_string(),
            immediate_marker: "#".to_string(),
            argument_template: "ARG({name})".to_string(),
            variable_template: "VAR({name})".to_string(),
            anon_prefix: "__anon".to_string(),
            markers: ScopeMarkers::Cpp,
        }
    }
}

impl Dialect {
    pub fn classify(&self, mnemonic: &str) -> LineClass {
        let pseudo = (!self.pseudo_prefix.is_empty() && mnemonic.starts_with(&self.pseudo_prefix))
            || (!self.pseudo_infix.is_empty() && mnemonic.contains(&self.pseudo_infix));
        if pseudo {
            LineClass::Pseudo
        } else {
            LineClass::Instruction
        }
    }

    /// Strips the local marker: `.loop` -> `loop`.
    pub fn local_name<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.local_prefix.as_str())
            .filter(|rest| !rest.is_empty())
    }

    pub fn qualify(&self, parent: Option<&str>, name: &str) -> String {
        match parent {
            Some(parent) => format!("{parent}{}{name}", self.scope_separator),
            None => name.to_string(),
        }
    }

    pub fn anonymous_name(&self, ordinal: u32) -> String {
        format!("{}{ordinal}", self.anon_prefix)
    }

    pub fn argument(&self, name: &str) -> String {
        self.argument_template.replace("{name}", name)
    }

    pub fn variable(&self, name: &str) -> String {
        self.variable_template.replace("{name}", name)
    }
}
