//! Molecular Viewer Tools
//!
//! The model drives the structure viewer through three function calls:
//! `load_structure`, `set_representation` and `highlight_residues`. This
//! module declares those functions for the session handshake, parses the
//! calls the model sends back, and applies them to whatever
//! [`StructureViewer`] the runtime provides. Rendering itself lives behind
//! that trait.

use gemini_realtime::{FunctionCall, FunctionDeclaration, FunctionResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

pub const LOAD_STRUCTURE: &str = "load_structure";
pub const SET_REPRESENTATION: &str = "set_representation";
pub const HIGHLIGHT_RESIDUES: &str = "highlight_residues";

/// Words that, in model text, announce a structure identifier.
const ID_KEYWORDS: &[&str] = &["load", "loading", "show", "showing", "fetch", "pdb", "open"];
/// How many words after a keyword are searched for an identifier.
const ID_LOOKAHEAD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewerError {
    #[error("Unknown viewer tool: {0}")]
    UnknownTool(String),
    #[error("{tool}: missing argument '{arg}'")]
    MissingArgument { tool: String, arg: &'static str },
    #[error("{tool}: invalid argument '{arg}': {reason}")]
    InvalidArgument {
        tool: String,
        arg: &'static str,
        reason: String,
    },
    #[error("Viewer failed: {0}")]
    Viewer(String),
}

// --- Commands ---

/// How the loaded structure is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    Cartoon,
    Stick,
    Sphere,
    Surface,
    Line,
}

impl Representation {
    pub const ALL: [Representation; 5] = [
        Representation::Cartoon,
        Representation::Stick,
        Representation::Sphere,
        Representation::Surface,
        Representation::Line,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Representation::Cartoon => "cartoon",
            Representation::Stick => "stick",
            Representation::Sphere => "sphere",
            Representation::Surface => "surface",
            Representation::Line => "line",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Representation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        // Accept the plural forms models tend to produce ("sticks", "spheres").
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        Representation::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized || r.as_str() == singular)
            .ok_or_else(|| format!("unknown representation '{s}'"))
    }
}

/// A residue range to emphasise. `end` defaults to `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub chain: Option<String>,
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(chain) = &self.chain {
            write!(f, "{chain}:")?;
        }
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// One parsed viewer function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    LoadStructure { id: String },
    SetRepresentation { style: Representation },
    Highlight(Region),
}

impl ViewerCommand {
    /// Parses a function call by name and JSON arguments.
    pub fn from_call(name: &str, args: &Value) -> Result<Self, ViewerError> {
        match name {
            LOAD_STRUCTURE => {
                let raw = required_str(name, args, "id")?;
                let id = normalize_pdb_id(raw).ok_or_else(|| ViewerError::InvalidArgument {
                    tool: name.to_string(),
                    arg: "id",
                    reason: format!("'{raw}' is not a PDB identifier"),
                })?;
                Ok(ViewerCommand::LoadStructure { id })
            }
            SET_REPRESENTATION => {
                let raw = required_str(name, args, "style")?;
                let style = raw
                    .parse::<Representation>()
                    .map_err(|reason| ViewerError::InvalidArgument {
                        tool: name.to_string(),
                        arg: "style",
                        reason,
                    })?;
                Ok(ViewerCommand::SetRepresentation { style })
            }
            HIGHLIGHT_RESIDUES => {
                let start = residue_number(name, args, "start")?.ok_or_else(|| {
                    ViewerError::MissingArgument {
                        tool: name.to_string(),
                        arg: "start",
                    }
                })?;
                let end = residue_number(name, args, "end")?.unwrap_or(start);
                if end < start {
                    return Err(ViewerError::InvalidArgument {
                        tool: name.to_string(),
                        arg: "end",
                        reason: format!("{end} is before start {start}"),
                    });
                }
                let chain = args
                    .get("chain")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_ascii_uppercase);
                Ok(ViewerCommand::Highlight(Region { chain, start, end }))
            }
            other => Err(ViewerError::UnknownTool(other.to_string())),
        }
    }
}

fn required_str<'a>(tool: &str, args: &'a Value, arg: &'static str) -> Result<&'a str, ViewerError> {
    args.get(arg)
        .and_then(Value::as_str)
        .ok_or_else(|| ViewerError::MissingArgument {
            tool: tool.to_string(),
            arg,
        })
}

/// Residue numbers arrive as JSON numbers or, occasionally, numeric strings.
fn residue_number(tool: &str, args: &Value, arg: &'static str) -> Result<Option<u32>, ViewerError> {
    let invalid = |reason: String| ViewerError::InvalidArgument {
        tool: tool.to_string(),
        arg,
        reason,
    };
    match args.get(arg) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| invalid(format!("{n} is not a residue number"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| invalid(e.to_string())),
        Some(other) => Err(invalid(format!("unexpected value {other}"))),
    }
}

/// Upper-cases `raw` if it is a four-character PDB identifier: a digit 1-9
/// followed by three alphanumerics.
pub fn normalize_pdb_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    let bytes = id.as_bytes();
    let valid = bytes.len() == 4
        && (b'1'..=b'9').contains(&bytes[0])
        && bytes[1..].iter().all(u8::is_ascii_alphanumeric);
    valid.then(|| id.to_ascii_uppercase())
}

/// Finds structure identifiers the model mentions after a load/show/fetch
/// style keyword, e.g. "Loading PDB 1CRN now". Returns unique identifiers in
/// order of first mention.
pub fn detect_structure_ids(text: &str) -> Vec<String> {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut found = Vec::new();
    for (i, word) in words.iter().enumerate() {
        if !ID_KEYWORDS.contains(&word.to_ascii_lowercase().as_str()) {
            continue;
        }
        let candidate = words[i + 1..]
            .iter()
            .take(ID_LOOKAHEAD)
            .find_map(|w| normalize_pdb_id(w));
        if let Some(id) = candidate {
            if !found.contains(&id) {
                found.push(id);
            }
        }
    }
    found
}

// --- Declarations ---

/// Declarations for the viewer tools, ready for `SessionConfig::with_functions`.
pub fn tool_declarations() -> Vec<FunctionDeclaration> {
    let styles: Vec<&str> = Representation::ALL.iter().map(|r| r.as_str()).collect();
    vec![
        FunctionDeclaration {
            name: LOAD_STRUCTURE.to_string(),
            description: Some(
                "Load a protein structure into the 3D viewer by its four-character PDB identifier."
                    .to_string(),
            ),
            parameters: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "id": {"type": "STRING", "description": "PDB identifier, e.g. 1CRN"}
                },
                "required": ["id"]
            })),
        },
        FunctionDeclaration {
            name: SET_REPRESENTATION.to_string(),
            description: Some("Change how the loaded structure is drawn.".to_string()),
            parameters: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "style": {"type": "STRING", "enum": styles}
                },
                "required": ["style"]
            })),
        },
        FunctionDeclaration {
            name: HIGHLIGHT_RESIDUES.to_string(),
            description: Some(
                "Highlight a residue or a range of residues in the loaded structure.".to_string(),
            ),
            parameters: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "chain": {"type": "STRING", "description": "Chain identifier, e.g. A"},
                    "start": {"type": "INTEGER", "description": "First residue number"},
                    "end": {"type": "INTEGER", "description": "Last residue number (inclusive)"}
                },
                "required": ["start"]
            })),
        },
    ]
}

// --- Execution ---

/// A viewer the tools can drive.
#[cfg_attr(test, mockall::automock)]
pub trait StructureViewer: Send {
    fn load_structure(&mut self, id: &str) -> Result<(), ViewerError>;
    fn set_representation(&mut self, style: Representation) -> Result<(), ViewerError>;
    fn highlight(&mut self, region: &Region) -> Result<(), ViewerError>;
}

/// Runs `command` against `viewer` and describes the outcome as the JSON
/// object returned to the model.
pub fn apply(viewer: &mut dyn StructureViewer, command: &ViewerCommand) -> Value {
    let (outcome, summary) = match command {
        ViewerCommand::LoadStructure { id } => {
            (viewer.load_structure(id), format!("Loaded structure {id}"))
        }
        ViewerCommand::SetRepresentation { style } => (
            viewer.set_representation(*style),
            format!("Representation set to {style}"),
        ),
        ViewerCommand::Highlight(region) => {
            (viewer.highlight(region), format!("Highlighted residues {region}"))
        }
    };
    match outcome {
        Ok(()) => {
            info!(%summary, "Viewer command applied");
            json!({"ok": true, "result": summary})
        }
        Err(e) => {
            warn!(error = %e, ?command, "Viewer command failed");
            json!({"ok": false, "error": e.to_string()})
        }
    }
}

/// Answers one model function call. Unknown tools and bad arguments are
/// reported back to the model rather than dropped.
pub fn respond(viewer: &mut dyn StructureViewer, call: &FunctionCall) -> FunctionResponse {
    let response = match ViewerCommand::from_call(&call.name, &call.args) {
        Ok(command) => apply(viewer, &command),
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Rejected viewer tool call");
            json!({"ok": false, "error": e.to_string()})
        }
    };
    FunctionResponse {
        id: call.id.clone(),
        name: Some(call.name.clone()),
        response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_parse_load_structure() {
        let command = ViewerCommand::from_call(LOAD_STRUCTURE, &json!({"id": " 1crn "})).unwrap();
        assert_eq!(command, ViewerCommand::LoadStructure { id: "1CRN".to_string() });

        let err = ViewerCommand::from_call(LOAD_STRUCTURE, &json!({"id": "crambin"})).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidArgument { arg: "id", .. }));

        let err = ViewerCommand::from_call(LOAD_STRUCTURE, &json!({})).unwrap_err();
        assert_eq!(
            err,
            ViewerError::MissingArgument { tool: LOAD_STRUCTURE.to_string(), arg: "id" }
        );
    }

    #[test]
    fn test_parse_representation() {
        assert_eq!("Cartoon".parse::<Representation>(), Ok(Representation::Cartoon));
        assert_eq!("sticks".parse::<Representation>(), Ok(Representation::Stick));
        assert_eq!("SURFACE".parse::<Representation>(), Ok(Representation::Surface));
        assert!("ribbon".parse::<Representation>().is_err());

        let command =
            ViewerCommand::from_call(SET_REPRESENTATION, &json!({"style": "spheres"})).unwrap();
        assert_eq!(command, ViewerCommand::SetRepresentation { style: Representation::Sphere });
    }

    #[test]
    fn test_parse_highlight() {
        let command = ViewerCommand::from_call(
            HIGHLIGHT_RESIDUES,
            &json!({"chain": "a", "start": 10, "end": "25"}),
        )
        .unwrap();
        assert_eq!(
            command,
            ViewerCommand::Highlight(Region { chain: Some("A".to_string()), start: 10, end: 25 })
        );

        let single = ViewerCommand::from_call(HIGHLIGHT_RESIDUES, &json!({"start": 42})).unwrap();
        assert_eq!(single, ViewerCommand::Highlight(Region { chain: None, start: 42, end: 42 }));

        let backwards =
            ViewerCommand::from_call(HIGHLIGHT_RESIDUES, &json!({"start": 9, "end": 3}));
        assert!(matches!(backwards, Err(ViewerError::InvalidArgument { arg: "end", .. })));

        let negative = ViewerCommand::from_call(HIGHLIGHT_RESIDUES, &json!({"start": -1}));
        assert!(matches!(negative, Err(ViewerError::InvalidArgument { arg: "start", .. })));
    }

    #[test]
    fn test_unknown_tool() {
        assert_eq!(
            ViewerCommand::from_call("rotate", &json!({})),
            Err(ViewerError::UnknownTool("rotate".to_string()))
        );
    }

    #[test]
    fn test_detect_structure_ids() {
        assert_eq!(detect_structure_ids("Loading PDB 1CRN for you."), vec!["1CRN"]);
        assert_eq!(
            detect_structure_ids("Let me show you 4hhb, then fetch 1crn and load 4HHB again"),
            vec!["4HHB", "1CRN"]
        );
        // Identifiers without a keyword nearby are not commands.
        assert!(detect_structure_ids("1CRN is crambin").is_empty());
        assert!(detect_structure_ids("show the protein").is_empty());
    }

    #[test]
    fn test_declarations_cover_every_tool() {
        let names: Vec<String> = tool_declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![LOAD_STRUCTURE, SET_REPRESENTATION, HIGHLIGHT_RESIDUES]);

        let declarations = tool_declarations();
        let parameters = declarations[1].parameters.as_ref().unwrap();
        let style_enum = &parameters["properties"]["style"]["enum"];
        assert_eq!(style_enum.as_array().unwrap().len(), Representation::ALL.len());
    }

    #[test]
    fn test_apply_drives_viewer() {
        let mut viewer = MockStructureViewer::new();
        viewer
            .expect_load_structure()
            .with(eq("4HHB"))
            .times(1)
            .returning(|_| Ok(()));

        let result = apply(&mut viewer, &ViewerCommand::LoadStructure { id: "4HHB".to_string() });
        assert_eq!(result, json!({"ok": true, "result": "Loaded structure 4HHB"}));
    }

    #[test]
    fn test_apply_reports_viewer_failure() {
        let mut viewer = MockStructureViewer::new();
        viewer
            .expect_highlight()
            .times(1)
            .returning(|_| Err(ViewerError::Viewer("no structure loaded".to_string())));

        let region = Region { chain: Some("B".to_string()), start: 5, end: 9 };
        let result = apply(&mut viewer, &ViewerCommand::Highlight(region));
        assert_eq!(result["ok"], false);
        assert!(result["error"].as_str().unwrap().contains("no structure loaded"));
    }

    #[test]
    fn test_respond_echoes_call_id() {
        let mut viewer = MockStructureViewer::new();
        viewer
            .expect_set_representation()
            .with(eq(Representation::Surface))
            .times(1)
            .returning(|_| Ok(()));

        let call = FunctionCall {
            id: "call-7".to_string(),
            name: SET_REPRESENTATION.to_string(),
            args: json!({"style": "surface"}),
        };
        let response = respond(&mut viewer, &call);
        assert_eq!(response.id, "call-7");
        assert_eq!(response.name.as_deref(), Some(SET_REPRESENTATION));
        assert_eq!(response.response["ok"], true);
    }

    #[test]
    fn test_respond_rejects_bad_call_without_touching_viewer() {
        let mut viewer = MockStructureViewer::new();
        let call = FunctionCall {
            id: "c1".to_string(),
            name: "spin".to_string(),
            args: Value::Null,
        };
        let response = respond(&mut viewer, &call);
        assert_eq!(response.response["ok"], false);
        assert_eq!(response.response["error"], "Unknown viewer tool: spin");
    }
}
