//! Page landmarks of the workspace UI.

use crate::browser::Locator;

/// Class of the scrollable tree container.
pub const TREE_CONTAINER_CLASS: &str = "MAINSITE_CATALOG-node-tree-list";

/// Banner text shown when the user may not open a document.
pub const NO_PERMISSION_TEXT: &str = "暂无权限访问";

/// Button text of the size-limit confirmation ("continue export").
pub const CONTINUE_EXPORT_TEXT: &str = "继续导出";

/// Reads `{scrollTop, clientHeight, scrollHeight}` of the tree container.
pub const TREE_METRICS_SCRIPT: &str = r#"(() => {
  const el = document.getElementsByClassName("MAINSITE_CATALOG-node-tree-list")[0];
  if (!el) { return null; }
  return { scrollTop: el.scrollTop, clientHeight: el.clientHeight, scrollHeight: el.scrollHeight };
})()"#;

/// The draggable tree row of a node.
pub fn tree_row(dentry_uuid: &str) -> Locator {
    Locator::attr("data-rbd-draggable-id", dentry_uuid)
}

/// The scrollable tree container.
pub fn tree_container() -> Locator {
    Locator::css(format!(".{TREE_CONTAINER_CLASS}"))
}

/// Elements that carry the no-permission banner.
pub fn permission_banner() -> Locator {
    Locator::item_key("apply-title-view")
}

/// Size-limit confirmation button.
pub fn continue_export_button() -> Locator {
    Locator::tag_text("button", CONTINUE_EXPORT_TEXT)
}

/// Plain download button of stored files.
pub fn download_button() -> Locator {
    Locator::item_key("download")
}

/// "More" button of the restricted document header.
pub fn header_more_button() -> Locator {
    Locator::test_id("doc-header-more-button")
}

/// Main toolbar menu of the online editors.
pub fn toolbar_menu() -> Locator {
    Locator::test_id("bi-toolbar-menu")
}

/// Entry of the toolbar menu, e.g. `J_file` or `J_exportAsWord`.
pub fn menu_item(id: &str) -> Locator {
    Locator::test_id(format!("menu-item-{id}"))
}

/// Frame hosting the spreadsheet editor.
pub fn sheet_frame() -> Locator {
    Locator::css("#wiki-new-sheet-iframe")
}

/// Heuristic download affordances tried for unknown formats, in order.
pub fn heuristic_download_controls() -> Vec<Locator> {
    vec![
        Locator::text("下载"),
        Locator::text("Download"),
        Locator::attr_contains("aria-label", "下载"),
        Locator::attr_contains("aria-label", "Download"),
        Locator::tag_text("button", "download"),
        Locator::css(".download"),
        Locator::css("[class*=download]"),
    ]
}

/// Containers whose text is saved when a text file has no download control.
pub fn text_containers() -> Vec<Locator> {
    vec![Locator::css("pre"), Locator::css(".content")]
}
