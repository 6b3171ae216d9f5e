//! `wp-config.php` rewrite policy.
//!
//! Points the configuration at the destination URL and comments out
//! host-specific constants and includes that would pin the site to the
//! source host.

use regex::Regex;

use crate::error::Result;

/// Host-specific include directives commented out wholesale.
const COMMENTED_INCLUDES: [&str; 3] = [
    "include __DIR__ . '/user-configs.php';",
    "include __DIR__ . '/wp-fail2ban-configs.php';",
    "include __DIR__ . '/smtp-provider-wp-configs.php';",
];

/// Alternate-install-layout ABSPATH constant and its standard form.
const ALT_ABSPATH: &str = "define('ABSPATH', dirname(__FILE__) . '/.wordpress/');";
const STD_ABSPATH: &str = "define( 'ABSPATH', dirname( __FILE__ ) . '/' );";

/// Rewrite `wp-config.php` content for transfer.
pub fn rewrite(content: &str, site_url: Option<&str>, dest_url: Option<&str>) -> Result<String> {
    let mut content = content.to_string();

    if let (Some(site_url), Some(dest_url)) = (site_url, dest_url) {
        if !site_url.is_empty() {
            content = content.replace(site_url, dest_url);
        }
    }

    content = content.replace(ALT_ABSPATH, STD_ABSPATH);

    for include in COMMENTED_INCLUDES {
        content = content.replace(include, &format!("// {include}"));
    }

    for constant in ["WP_SITEURL", "WP_HOME", "COOKIE_DOMAIN"] {
        content = comment_define_lines(&content, constant)?;
    }

    Ok(content)
}

/// Comment out every line containing a `define(` for the named constant,
/// prefixing only the matched line.
fn comment_define_lines(content: &str, constant: &str) -> Result<String> {
    let pattern = Regex::new(&format!(r"define\(\s*'{constant}'"))?;
    let mut out = String::with_capacity(content.len());
    for (index, line) in content.split('\n').enumerate() {
        if index > 0 {
            out.push('\n');
        }
        if pattern.is_match(line) {
            out.push_str("// ");
        }
        out.push_str(line);
    }
    Ok(out)
}
