/// Substitute `%TOKEN%` placeholders in a message template.
///
/// Replacement is literal; tokens that do not appear in the template are
/// ignored, and unknown placeholders in the template are left untouched.
pub fn render_template(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (token, value) in substitutions {
        rendered = rendered.replace(token, value);
    }
    rendered
}
