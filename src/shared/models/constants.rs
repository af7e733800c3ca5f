// Capability names understood by the external notebook executor
pub const TOOL_CREATE_NOTEBOOK: &str = "create_notebook";
pub const TOOL_ADD_CELL: &str = "add_cell";
pub const TOOL_UPDATE_CELL: &str = "update_cell";
pub const TOOL_DELETE_CELL: &str = "delete_cell";
pub const TOOL_RUN_CELLS: &str = "run_cells";

// Names older executors and prompts still emit
pub const LEGACY_GEN_NOTEBOOK: &str = "gen_notebook";
pub const LEGACY_RUN_NOTEBOOK: &str = "run_notebook";
pub const LEGACY_UPDATE_CELL_BY_ID: &str = "update_cell_by_id";
pub const LEGACY_DELETE_CELL_BY_ID: &str = "delete_cell_by_id";

// Response `type` values on the wire
pub const RESPONSE_TYPE_AI: &str = "ai";
pub const RESPONSE_TYPE_FUNCTION: &str = "function";
pub const RESPONSE_TYPE_STOP: &str = "stop";

pub const TOOL_STATUS_SUCCESS: &str = "success";
pub const TOOL_STATUS_ERROR: &str = "error";

pub const DEFAULT_STOP_KEYWORD: &str = "system_stop";
pub const DEFAULT_KERNEL: &str = "python3";
