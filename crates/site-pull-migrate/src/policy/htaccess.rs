//! `.htaccess` rewrite policy.
//!
//! Strips third-party security-plugin blocks, neutralizes directives that
//! would break on the destination host, and optionally redirects the
//! uploads subtree back to the source site when media is skipped.

use regex::Regex;

use crate::error::Result;

/// Rewrite `.htaccess` content for transfer.
pub fn rewrite(content: &str, site_url: Option<&str>, skip_media_folder: bool) -> Result<String> {
    let mut content = content.to_string();

    // Really Simple SSL Redirect block
    let rssr = Regex::new(r"(?s)#Begin Really Simple SSL Redirect.*?#End Really Simple SSL Redirect")?;
    content = rssr.replace_all(&content, "").into_owned();

    // MalCare WAF block
    let malcare = Regex::new(r"(?s)#MalCare WAF.*?#END MalCare WAF")?;
    content = malcare.replace_all(&content, "").into_owned();

    // php_value / php_flag directives
    let php_value = Regex::new(r"(?m)^\s*php_value\s+")?;
    content = php_value.replace_all(&content, "# php_value ").into_owned();
    let php_flag = Regex::new(r"(?m)^\s*php_flag\s+")?;
    content = php_flag.replace_all(&content, "# php_flag ").into_owned();

    // Auth and error-document directives the destination cannot honor
    for needle in ["AuthGroupFile", "AuthUserFile", "AuthName", "ErrorDocument", "proxy:fcgi"] {
        let pattern = Regex::new(&format!(r"(?m)^(.*{needle}.*)$"))?;
        content = pattern.replace_all(&content, "# ${1}").into_owned();
    }

    if let Some(site_url) = site_url {
        // A site installed under a sub-path moves to the destination root.
        if let Some(path) = url_path(site_url) {
            if !path.is_empty() && path != "/" {
                let rewrite_base = Regex::new(r"RewriteBase\s+/[^/]+/")?;
                content = rewrite_base
                    .replace_all(&content, "RewriteBase /")
                    .into_owned();

                let rewrite_rule = Regex::new(r"(RewriteRule\s+\.\s+/)[^/]+")?;
                content = rewrite_rule
                    .replace_all(&content, "RewriteRule . ")
                    .into_owned();
            }
        }

        if skip_media_folder {
            let preamble = [
                "## BEGIN pull-migrate uploads redirect".to_string(),
                "<IfModule mod_rewrite.c>".to_string(),
                "RewriteEngine On".to_string(),
                "RewriteCond %{REQUEST_FILENAME} !-f".to_string(),
                format!("RewriteRule ^wp-content/uploads/(.*)$ {site_url}/wp-content/uploads/$1 [R=301,L]"),
                "</IfModule>".to_string(),
                "## END pull-migrate uploads redirect".to_string(),
            ]
            .join("\n");
            content = format!("{preamble}\n\n{content}");
        }
    }

    Ok(content)
}

/// Extract the path component of a URL without pulling in a URL parser.
fn url_path(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.find('/').map(|idx| rest[idx..].to_string())
}
