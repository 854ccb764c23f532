use crate::template::{TemplateSegment, VariableSource};

/// A template input declared by the planner. Two variables are considered
/// equal when they share a kind and a path; the rendering flag does not
/// participate so a context value referenced twice is only planned once.
#[derive(Debug, Clone, Eq)]
pub enum Variable {
    Context {
        path: Vec<String>,
        render_as_graphql_value: bool,
    },
    Object {
        path: Vec<String>,
    },
    Header {
        path: Vec<String>,
    },
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variable::Context { path: a, .. }, Variable::Context { path: b, .. }) => a == b,
            (Variable::Object { path: a }, Variable::Object { path: b }) => a == b,
            (Variable::Header { path: a }, Variable::Header { path: b }) => a == b,
            _ => false,
        }
    }
}

impl Variable {
    pub fn template_segment(&self) -> TemplateSegment {
        match self {
            Variable::Context {
                path,
                render_as_graphql_value,
            } => TemplateSegment::Variable {
                source: VariableSource::Context,
                path: path.clone(),
                render_as_graphql_value: *render_as_graphql_value,
            },
            Variable::Object { path } => TemplateSegment::Variable {
                source: VariableSource::Object,
                path: path.clone(),
                render_as_graphql_value: false,
            },
            Variable::Header { path } => TemplateSegment::Variable {
                source: VariableSource::RequestHeader,
                path: path.clone(),
                render_as_graphql_value: false,
            },
        }
    }
}

const VARIABLE_PREFIX_SUFFIX: &str = "$$";

/// The set of variables a fetch input references, in placeholder order.
#[derive(Debug, Clone, Default)]
pub struct Variables(Vec<Variable>);

impl Variables {
    pub fn new(variables: Vec<Variable>) -> Self {
        Variables(variables)
    }

    /// Registers `variable` and returns its `$$<index>$$` placeholder,
    /// optionally wrapped in quotes. An equal variable that was added before
    /// is reused; the second return reports whether that happened.
    pub fn add_variable(&mut self, variable: Variable, quote_value: bool) -> (String, bool) {
        let (index, exists) = match self.0.iter().position(|existing| *existing == variable) {
            Some(index) => (index, true),
            None => {
                self.0.push(variable);
                (self.0.len() - 1, false)
            }
        };
        let mut name = format!("{VARIABLE_PREFIX_SUFFIX}{index}{VARIABLE_PREFIX_SUFFIX}");
        if quote_value {
            name = format!("\"{name}\"");
        }
        (name, exists)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
