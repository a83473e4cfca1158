//! Route Classification
//!
//! Derives a provisional bucket key from a request's verb, path template,
//! and major path parameter. The remote's true bucket identity only shows
//! up in a response header, so concurrent first-time calls to one logical
//! route must already share a queue by the time the first response lands.

use std::fmt;

/// Path parameters the remote partitions buckets by. The first one present
/// in a template (by position) is the route's major parameter.
const MAJOR_PARAMS: [&str; 3] = ["channel_id", "guild_id", "webhook_id"];

/// HTTP verb of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    /// Uppercase method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified route: verb, fully-substituted path, and the major
/// parameter partitioning its rate-limit bucket. Never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    verb: Verb,
    path: String,
    keyed_template: String,
    major: Option<String>,
}

impl RouteDescriptor {
    /// Build a descriptor from a path template and its parameters.
    ///
    /// Placeholders use `{name}` syntax. Parameters absent from the
    /// template are ignored; shaping a valid path is the resource module's
    /// job, not the dispatcher's.
    pub fn new(verb: Verb, template: &str, params: &[(&str, &str)]) -> Self {
        let mut path = template.to_string();
        for (name, value) in params {
            path = path.replace(&format!("{{{}}}", name), value);
        }

        // Major parameter: the earliest major placeholder in the template
        // that has a supplied value.
        let major = MAJOR_PARAMS
            .iter()
            .filter_map(|name| {
                let placeholder = format!("{{{}}}", name);
                let pos = template.find(&placeholder)?;
                let value = params.iter().find(|(n, _)| n == name)?.1;
                Some((pos, placeholder, value))
            })
            .min_by_key(|(pos, _, _)| *pos);

        let keyed_template = match &major {
            Some((_, placeholder, value)) => template.replace(placeholder.as_str(), value),
            None => template.to_string(),
        };

        Self {
            verb,
            path,
            keyed_template,
            major: major.map(|(_, _, value)| value.to_string()),
        }
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// The fully-substituted request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The major parameter value, if the route has one.
    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }

    /// Provisional bucket key: the verb plus the template with the major
    /// parameter substituted and minor placeholders left intact.
    pub fn bucket_key(&self) -> String {
        format!("{}:{}", self.verb, self.keyed_template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_params_into_path() {
        let route = RouteDescriptor::new(
            Verb::Get,
            "/channels/{channel_id}/messages/{message_id}",
            &[("channel_id", "100"), ("message_id", "7")],
        );

        assert_eq!(route.path(), "/channels/100/messages/7");
        assert_eq!(route.major(), Some("100"));
    }

    #[test]
    fn bucket_key_partitions_by_major_param() {
        let template = "/channels/{channel_id}/messages/{message_id}";
        let a = RouteDescriptor::new(
            Verb::Get,
            template,
            &[("channel_id", "100"), ("message_id", "1")],
        );
        let b = RouteDescriptor::new(
            Verb::Get,
            template,
            &[("channel_id", "100"), ("message_id", "2")],
        );
        let c = RouteDescriptor::new(
            Verb::Get,
            template,
            &[("channel_id", "200"), ("message_id", "1")],
        );

        assert_eq!(a.bucket_key(), "GET:/channels/100/messages/{message_id}");
        // Same channel shares a bucket across message ids.
        assert_eq!(a.bucket_key(), b.bucket_key());
        assert_ne!(a.bucket_key(), c.bucket_key());
    }

    #[test]
    fn verb_partitions_buckets() {
        let template = "/channels/{channel_id}/messages/{message_id}";
        let params: &[(&str, &str)] = &[("channel_id", "100"), ("message_id", "1")];
        let get = RouteDescriptor::new(Verb::Get, template, params);
        let delete = RouteDescriptor::new(Verb::Delete, template, params);

        assert_ne!(get.bucket_key(), delete.bucket_key());
    }

    #[test]
    fn routes_without_major_param_share_one_bucket() {
        let route = RouteDescriptor::new(Verb::Get, "/gateway/bot", &[]);

        assert_eq!(route.major(), None);
        assert_eq!(route.bucket_key(), "GET:/gateway/bot");
    }

    #[test]
    fn earliest_major_placeholder_wins() {
        let route = RouteDescriptor::new(
            Verb::Get,
            "/guilds/{guild_id}/channels/{channel_id}",
            &[("guild_id", "55"), ("channel_id", "9")],
        );

        assert_eq!(route.major(), Some("55"));
        assert_eq!(route.bucket_key(), "GET:/guilds/55/channels/{channel_id}");
    }
}
