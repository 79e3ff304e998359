/// Adds the implicit `library/` namespace to an unqualified repository name in a
/// `type:name:actions` scope. Anything that is not a three-part scope is left unchanged.
pub fn normalize_for_default_registry(scope: Option<&str>) -> Option<String> {
    let scope = scope?;
    let parts: Vec<&str> = scope.split(':').collect();

    if let [kind, name, actions] = parts.as_slice() {
        if !name.contains('/') {
            return Some(format!("{kind}:library/{name}:{actions}"));
        }
    }

    Some(scope.to_string())
}
