use serde_json::Value;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant text.
    Assistant(String),
    /// What the agent observed after executing a tool call.
    Tool(ToolObservation),
}

/// The observed outcome of a tool call, fed back to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolObservation {
    /// The identifier of the tool call this observes.
    pub id: String,
    /// The name of the tool that was called.
    pub tool_name: String,
    /// The textual outcome of the call.
    pub content: String,
    /// Whether the content describes a failure.
    pub is_error: bool,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}
