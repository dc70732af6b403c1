//! File gateway: upload naming, task id allocation, proxied file access

mod hyperlinks;
mod naming;
mod open;
mod proxy;

pub use hyperlinks::rewrite_docx_hyperlinks;
pub use open::{describe_open_target, OpenTarget};
pub use naming::{generate_task_id, next_free_task_id, next_task_id_after_max, unique_file_name};
pub use proxy::{
    content_type_for, image_content_type, resolve_allowed_content_path, resolve_file_proxy_path,
    resolve_image_proxy_path, FILE_CONTENT_PREFIXES, FILE_PROXY_PREFIXES,
};
