//! Canned task strings for the bundled commands.

pub const PRICE_COMPARISON: &str = "Compare the price of gpt-4o and DeepSeek-V3";

/// Viewports exercised by the responsive audit, as (class, width, height).
pub const AUDIT_VIEWPORTS: &[(&str, u32, u32)] = &[
    ("mobile", 320, 568),
    ("mobile", 375, 667),
    ("mobile", 414, 896),
    ("tablet", 768, 1024),
    ("tablet", 1024, 1366),
    ("desktop", 1366, 768),
    ("desktop", 1920, 1080),
];

/// Build the responsive-design audit instruction for one site. The agent is
/// expected to drive `set_viewport` through each size and report per-size
/// findings.
pub fn responsive_audit(url: &str) -> String {
    let mut task = format!(
        "Test the responsive design of {url} across various device types and screen sizes.\n\n"
    );
    task.push_str(
        "1. Resize the viewport to each of the following sizes (treat widths under \
         768 as portrait phones, and also consider the landscape orientation where \
         it applies):\n",
    );
    for (class, width, height) in AUDIT_VIEWPORTS {
        task.push_str(&format!("   - {class}: {width}x{height}\n"));
    }
    task.push_str(
        r#"
2. At each size, evaluate:
   - Content visibility and readability
   - Navigation usability
   - Image and media scaling
   - Form functionality
   - Touch targets and interactive elements

3. Check responsive specifics:
   - Hamburger menu behavior on mobile
   - Images resizing or hiding on mobile without covering text

Document every issue found together with the viewport it appeared at, and
recommend fixes ordered by severity."#,
    );
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_names_every_viewport() {
        let task = responsive_audit("https://letstalkaitools.com");
        assert!(task.contains("https://letstalkaitools.com"));
        for (_, width, height) in AUDIT_VIEWPORTS {
            assert!(
                task.contains(&format!("{width}x{height}")),
                "missing {width}x{height}"
            );
        }
    }
}
