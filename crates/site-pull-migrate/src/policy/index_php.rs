//! `index.php` rewrite policy.
//!
//! Alternate-install layouts bootstrap from a `.wordpress/` subdirectory;
//! the destination uses the standard layout.

/// Rewrite `index.php` content for transfer.
pub fn rewrite(content: &str) -> String {
    content.replace("/.wordpress/wp-blog-header.php", "/wp-blog-header.php")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_alternate_bootstrap_path() {
        let input = "require __DIR__ . '/.wordpress/wp-blog-header.php';\n";
        let out = rewrite(input);
        assert_eq!(out, "require __DIR__ . '/wp-blog-header.php';\n");
    }

    #[test]
    fn standard_bootstrap_is_untouched() {
        let input = "require __DIR__ . '/wp-blog-header.php';\n";
        assert_eq!(rewrite(input), input);
    }
}
