//! Technology detection over a loaded page.
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::types::Technology;

/// What a rule looks at.
enum Check {
    Header(&'static str, &'static Lazy<Regex>),
    MetaGenerator(&'static Lazy<Regex>),
    Body(&'static Lazy<Regex>),
    ScriptSrc(&'static Lazy<Regex>),
    /// Any subresource URL: scripts, stylesheets and the like.
    Resource(&'static Lazy<Regex>),
    Cookie(&'static Lazy<Regex>),
}

struct Rule {
    name: &'static str,
    category: &'static str,
    check: Check,
}

macro_rules! re {
    ($name:ident, $pat:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pat).expect("valid fingerprint regex"));
    };
}

re!(RE_NGINX, r"(?i)nginx(?:/([\d.]+))?");
re!(RE_APACHE, r"(?i)apache(?:/([\d.]+))?");
re!(RE_IIS, r"(?i)microsoft-iis(?:/([\d.]+))?");
re!(RE_CADDY, r"(?i)caddy");
re!(RE_LITESPEED, r"(?i)litespeed");
re!(RE_CLOUDFLARE, r"(?i)cloudflare");
re!(RE_ANY, r".+");
re!(RE_PHP, r"(?i)php(?:/([\d.]+))?");
re!(RE_ASPNET, r"(?i)asp\.net");
re!(RE_EXPRESS, r"(?i)express");
re!(RE_NEXT_HEADER, r"(?i)next\.js(?: ([\d.]+))?");
re!(RE_WORDPRESS_GEN, r"(?i)wordpress ?([\d.]+)?");
re!(RE_JOOMLA_GEN, r"(?i)joomla");
re!(RE_DRUPAL_GEN, r"(?i)drupal ?([\d.]+)?");
re!(RE_HUGO_GEN, r"(?i)hugo ?([\d.]+)?");
re!(RE_WP_BODY, r"/wp-content/|/wp-includes/");
re!(RE_DRUPAL_BODY, r"/sites/default/files");
re!(RE_NUXT_BODY, r"__NUXT__|window\._nuxt");
re!(RE_NEXT_BODY, r"__NEXT_DATA__");
re!(RE_ANGULAR_BODY, r#"ng-version="([\d.]+)"|ng-app"#);
re!(RE_REACT_BODY, r"data-reactroot|react-dom");
re!(RE_VUE_BODY, r"data-v-app|__VUE_");
re!(RE_GATSBY_BODY, r#"id=["']___gatsby["']"#);
re!(RE_NEXT_SCRIPT, r"/_next/static/");
re!(RE_JQUERY_SCRIPT, r"(?i)jquery(?:[.-]?([\d.]+\d))?(?:\.min)?\.js");
re!(RE_BOOTSTRAP_SCRIPT, r"(?i)bootstrap(?:[.-]?([\d.]+\d))?(?:\.bundle)?(?:\.min)?\.js");
re!(RE_GA_SCRIPT, r"google-analytics\.com/|googletagmanager\.com/");
re!(RE_BOOTSTRAP_CSS, r"(?i)bootstrap(?:[.-]?([\d.]+\d))?(?:\.min)?\.css");
re!(RE_FONTAWESOME, r"(?i)font-?awesome(?:[/@-]v?([\d.]+\d))?");
re!(RE_GOOGLE_FONTS, r"fonts\.googleapis\.com/");
re!(RE_WP_RESOURCE, r"/wp-content/|/wp-includes/");
re!(RE_PHPSESSID, r"^PHPSESSID$");
re!(RE_JSESSIONID, r"^JSESSIONID$");
re!(RE_ASPSESSION, r"^ASP\.NET_SessionId$|^ASPSESSIONID");
re!(RE_DJANGO_CSRF, r"^csrftoken$");
re!(RE_LARAVEL, r"^laravel_session$");
re!(RE_RAILS, r"^_rails_session$|^_session_id$");
re!(RE_CF_COOKIE, r"^__cf_bm$|^__cfduid$|^cf_clearance$");

static RULES: &[Rule] = &[
    Rule { name: "Nginx", category: "Web Server", check: Check::Header("server", &RE_NGINX) },
    Rule { name: "Apache", category: "Web Server", check: Check::Header("server", &RE_APACHE) },
    Rule { name: "IIS", category: "Web Server", check: Check::Header("server", &RE_IIS) },
    Rule { name: "Caddy", category: "Web Server", check: Check::Header("server", &RE_CADDY) },
    Rule { name: "LiteSpeed", category: "Web Server", check: Check::Header("server", &RE_LITESPEED) },
    Rule { name: "Cloudflare", category: "CDN", check: Check::Header("server", &RE_CLOUDFLARE) },
    Rule { name: "Cloudflare", category: "CDN", check: Check::Header("cf-ray", &RE_ANY) },
    Rule { name: "Cloudflare", category: "CDN", check: Check::Cookie(&RE_CF_COOKIE) },
    Rule { name: "Fastly", category: "CDN", check: Check::Header("x-fastly-request-id", &RE_ANY) },
    Rule { name: "Amazon CloudFront", category: "CDN", check: Check::Header("x-amz-cf-id", &RE_ANY) },
    Rule { name: "PHP", category: "Programming Language", check: Check::Header("x-powered-by", &RE_PHP) },
    Rule { name: "PHP", category: "Programming Language", check: Check::Cookie(&RE_PHPSESSID) },
    Rule { name: "ASP.NET", category: "Web Framework", check: Check::Header("x-powered-by", &RE_ASPNET) },
    Rule { name: "ASP.NET", category: "Web Framework", check: Check::Header("x-aspnet-version", &RE_ANY) },
    Rule { name: "ASP.NET", category: "Web Framework", check: Check::Cookie(&RE_ASPSESSION) },
    Rule { name: "Express", category: "Web Framework", check: Check::Header("x-powered-by", &RE_EXPRESS) },
    Rule { name: "Java", category: "Programming Language", check: Check::Cookie(&RE_JSESSIONID) },
    Rule { name: "Django", category: "Web Framework", check: Check::Cookie(&RE_DJANGO_CSRF) },
    Rule { name: "Laravel", category: "Web Framework", check: Check::Cookie(&RE_LARAVEL) },
    Rule { name: "Ruby on Rails", category: "Web Framework", check: Check::Cookie(&RE_RAILS) },
    Rule { name: "Drupal", category: "CMS", check: Check::Header("x-drupal-cache", &RE_ANY) },
    Rule { name: "Drupal", category: "CMS", check: Check::MetaGenerator(&RE_DRUPAL_GEN) },
    Rule { name: "Drupal", category: "CMS", check: Check::Body(&RE_DRUPAL_BODY) },
    Rule { name: "WordPress", category: "CMS", check: Check::MetaGenerator(&RE_WORDPRESS_GEN) },
    Rule { name: "WordPress", category: "CMS", check: Check::Body(&RE_WP_BODY) },
    Rule { name: "Joomla", category: "CMS", check: Check::MetaGenerator(&RE_JOOMLA_GEN) },
    Rule { name: "Hugo", category: "Static Site Generator", check: Check::MetaGenerator(&RE_HUGO_GEN) },
    Rule { name: "Next.js", category: "JavaScript Framework", check: Check::Header("x-powered-by", &RE_NEXT_HEADER) },
    Rule { name: "Next.js", category: "JavaScript Framework", check: Check::Body(&RE_NEXT_BODY) },
    Rule { name: "Next.js", category: "JavaScript Framework", check: Check::ScriptSrc(&RE_NEXT_SCRIPT) },
    Rule { name: "Nuxt.js", category: "JavaScript Framework", check: Check::Body(&RE_NUXT_BODY) },
    Rule { name: "Angular", category: "JavaScript Framework", check: Check::Body(&RE_ANGULAR_BODY) },
    Rule { name: "React", category: "JavaScript Library", check: Check::Body(&RE_REACT_BODY) },
    Rule { name: "Vue.js", category: "JavaScript Framework", check: Check::Body(&RE_VUE_BODY) },
    Rule { name: "Gatsby", category: "Static Site Generator", check: Check::Body(&RE_GATSBY_BODY) },
    Rule { name: "jQuery", category: "JavaScript Library", check: Check::ScriptSrc(&RE_JQUERY_SCRIPT) },
    Rule { name: "Bootstrap", category: "UI Framework", check: Check::ScriptSrc(&RE_BOOTSTRAP_SCRIPT) },
    Rule { name: "Google Analytics", category: "Analytics", check: Check::ScriptSrc(&RE_GA_SCRIPT) },
    Rule { name: "Bootstrap", category: "UI Framework", check: Check::Resource(&RE_BOOTSTRAP_CSS) },
    Rule { name: "Font Awesome", category: "Font Script", check: Check::Resource(&RE_FONTAWESOME) },
    Rule { name: "Google Font API", category: "Font Script", check: Check::Resource(&RE_GOOGLE_FONTS) },
    Rule { name: "WordPress", category: "CMS", check: Check::Resource(&RE_WP_RESOURCE) },
];

/// Everything the matcher can look at for one page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageEvidence<'a> {
    pub headers: Option<&'a BTreeMap<String, Vec<String>>>,
    pub body: &'a str,
    pub meta_generator: Option<&'a str>,
    pub scripts: &'a [String],
    pub resources: &'a [String],
    pub cookies: &'a [String],
}

/// Run every rule against `evidence`. The output may contain the same
/// technology more than once; see [`dedup`].
pub fn detect(evidence: &PageEvidence<'_>) -> Vec<Technology> {
    let mut found = Vec::new();
    for rule in RULES {
        let version = match &rule.check {
            Check::Header(name, re) => evidence
                .headers
                .and_then(|h| h.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)))
                .and_then(|(_, values)| values.iter().find_map(|v| capture(re, v))),
            Check::MetaGenerator(re) => evidence.meta_generator.and_then(|g| capture(re, g)),
            Check::Body(re) => capture(re, evidence.body),
            Check::ScriptSrc(re) => evidence.scripts.iter().find_map(|s| capture(re, s)),
            Check::Resource(re) => evidence.resources.iter().find_map(|r| capture(re, r)),
            Check::Cookie(re) => evidence.cookies.iter().find_map(|c| capture(re, c)),
        };
        if let Some(version) = version {
            found.push(Technology::new(rule.name, rule.category, version));
        }
    }
    found
}

/// `Some(version)` when `re` matches; the version is the first capture group, if any.
fn capture(re: &Regex, haystack: &str) -> Option<Option<String>> {
    re.captures(haystack).map(|caps| {
        caps.get(1)
            .map(|m| m.as_str().trim_end_matches('.').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Keep one entry per technology name, in first-seen order. A later entry's
/// version fills in a missing one.
pub fn dedup(technologies: Vec<Technology>) -> Vec<Technology> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Technology> = Vec::with_capacity(technologies.len());
    for tech in technologies {
        match index.get(&tech.name) {
            Some(&i) => {
                if out[i].version.is_none() {
                    out[i].version = tech.version;
                }
            }
            None => {
                index.insert(tech.name.clone(), out.len());
                out.push(tech);
            }
        }
    }
    out
}
