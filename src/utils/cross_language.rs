// Deterministic naming-variant generation for cross-language matching.
//
// The same concept surfaces as IUser in TypeScript, User in C#, user in
// Python and users in SQL; user_service, userService and UserService are one
// symbol seen through three naming conventions. Variants are generated in a
// fixed order so traces are reproducible.

/// All naming variants of a symbol name, the original first. Order is
/// deterministic for a given input.
pub fn generate_naming_variants(name: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    add(&mut variants, name.to_string());

    for base in base_forms(name) {
        let words = split_words(&base);
        if words.is_empty() {
            continue;
        }

        let snake = words.join("_");
        let pascal = words.iter().map(|w| capitalize(w)).collect::<String>();
        let camel = {
            let mut out = words[0].clone();
            for word in &words[1..] {
                out.push_str(&capitalize(word));
            }
            out
        };
        let flat = words.concat();

        for form in [snake, camel, pascal.clone(), flat, base.to_lowercase()] {
            add(&mut variants, form.clone());
            add_plural_forms(&mut variants, &form);
        }

        // Interface-prefix convention
        add(&mut variants, format!("I{pascal}"));
    }

    variants
}

/// The name with decorating affixes removed: interface `I` prefix, and
/// Dto/Entity/Model/Impl suffixes.
fn base_forms(name: &str) -> Vec<String> {
    let mut bases = vec![name.to_string()];

    let mut chars = name.chars();
    if let (Some('I'), Some(second)) = (chars.next(), chars.next()) {
        if second.is_uppercase() {
            bases.push(name[1..].to_string());
        }
    }

    for suffix in ["Dto", "DTO", "Entity", "Model", "Impl"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            if !stripped.is_empty() {
                bases.push(stripped.to_string());
            }
        }
    }

    bases
}

fn add(variants: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !variants.contains(&candidate) {
        variants.push(candidate);
    }
}

fn add_plural_forms(variants: &mut Vec<String>, form: &str) {
    if let Some(singular) = form.strip_suffix('s') {
        add(variants, singular.to_string());
    } else {
        add(variants, format!("{form}s"));
    }
}

/// Split camelCase, PascalCase, snake_case and kebab-case into lowercase
/// words. Runs of uppercase (acronyms) stay one word.
fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                words.push(current.to_lowercase());
                current = String::new();
            }
            continue;
        }
        if ch.is_uppercase() && !current.is_empty() {
            let prev_lower = chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).map(|c| c.is_lowercase()).unwrap_or(false);
            if prev_lower || next_lower {
                words.push(current.to_lowercase());
                current = String::new();
            }
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current.to_lowercase());
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_prefix_bridges_to_plain_forms() {
        let variants = generate_naming_variants("IUser");
        assert!(variants.contains(&"User".to_string()));
        assert!(variants.contains(&"user".to_string()));
        assert!(variants.contains(&"users".to_string()));
    }

    #[test]
    fn case_conventions_bridge_each_other() {
        let variants = generate_naming_variants("user_service");
        assert!(variants.contains(&"userService".to_string()));
        assert!(variants.contains(&"UserService".to_string()));

        let back = generate_naming_variants("UserService");
        assert!(back.contains(&"user_service".to_string()));
        assert!(back.contains(&"userService".to_string()));
    }

    #[test]
    fn dto_suffix_strips() {
        let variants = generate_naming_variants("UserDto");
        assert!(variants.contains(&"User".to_string()));
        assert!(variants.contains(&"user".to_string()));
    }

    #[test]
    fn output_is_deterministic_and_starts_with_original() {
        let a = generate_naming_variants("getUserData");
        let b = generate_naming_variants("getUserData");
        assert_eq!(a, b);
        assert_eq!(a[0], "getUserData");
        assert!(a.contains(&"get_user_data".to_string()));
    }

    #[test]
    fn acronyms_stay_together() {
        let words = split_words("HTTPServer");
        assert_eq!(words, ["http", "server"]);
        let words = split_words("parseURL");
        assert_eq!(words, ["parse", "url"]);
    }
}
