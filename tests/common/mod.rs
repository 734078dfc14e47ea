//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::Path;

/// A `[transport]` table that is never actually connected to
pub const UNUSED_TRANSPORT: &str = r#"
[transport]
type = "stdio"
command = "unused-mcp-server"
"#;

/// Write one server into a schema store
pub fn write_server(root: &Path, name: &str, transport: &str, tools: &[(&str, &str)]) {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("tools")).unwrap();

    let mut index = format!("[server]\ndescription = \"{} tools\"\n{}\n", name, transport);
    for (tool, description) in tools {
        index.push_str(&format!("\n[[tool]]\nname = \"{}\"\ndescription = \"{}\"\n", tool, description));
        fs::write(
            dir.join("tools").join(format!("{}.json", tool)),
            format!(r#"{{"description": "{}", "input": {{"type": "object"}}}}"#, description),
        )
        .unwrap();
    }
    fs::write(dir.join("index.toml"), index).unwrap();
}

/// The catalogue used across scenarios
pub fn write_catalogue(root: &Path, chrome_transport: &str) {
    write_server(
        root,
        "atlassian",
        UNUSED_TRANSPORT,
        &[
            ("getJiraIssue", "Get a Jira issue by key"),
            ("createJiraIssue", "Create a new Jira issue"),
        ],
    );
    write_server(
        root,
        "chrome-devtools",
        chrome_transport,
        &[
            ("navigate_page", "Navigate the selected page to a URL"),
            ("take_screenshot", "Take a screenshot of the page"),
        ],
    );
}
