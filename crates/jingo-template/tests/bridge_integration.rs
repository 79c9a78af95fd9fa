//! Integration tests for the template bridge.
//!
//! Tests cover: loader precedence across project and application
//! directories, the inclusion filter, context flattening, safe-string
//! interop, helper registration and lazy helper modules, translations,
//! inclusion tags, context processors, URL reversal, and auto-reload.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use jingo_core::apps::{AppRegistry, SimpleAppConfig};
use jingo_core::{JingoError, Settings};
use jingo_template::context::{Context, ContextValue};
use jingo_template::environment::Environment;
use jingo_template::i18n::CatalogTranslations;
use jingo_template::library::Register;
use jingo_template::loaders::{JingoLoader, Origin, ResolveError, TemplateLoader};
use jingo_template::markup::Html;
use jingo_template::request::HttpRequest;
use jingo_template::signals::{TemplateRendered, TEMPLATE_RENDERED};
use jingo_template::urls::RouteTable;
use minijinja::Value;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn apps() -> AppRegistry {
    let mut apps = AppRegistry::new();
    apps.register(Arc::new(
        SimpleAppConfig::new("tests.jinja_app").with_path(fixtures().join("jinja_app")),
    ))
    .unwrap();
    apps.register(Arc::new(
        SimpleAppConfig::new("tests.other_app").with_path(fixtures().join("other_app")),
    ))
    .unwrap();
    apps
}

fn env() -> Environment {
    Environment::builder()
        .dir(fixtures().join("templates"))
        .apps(apps())
        .build()
        .unwrap()
}

fn render(env: &Environment, source: &str) -> String {
    env.from_string(source).unwrap().render(()).unwrap()
}

// ═════════════════════════════════════════════════════════════════════
// 1. Loader precedence
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_app_template_is_found() {
    let env = env();
    let template = env.get_template("jinja_app/test.html").unwrap();
    assert_eq!(template.render(()).unwrap(), "HELLO");
    assert!(template.filename().unwrap().ends_with("jinja_app/templates/jinja_app/test.html"));
}

#[test]
fn test_project_dirs_override_app_templates() {
    let env = env();
    let out = env.get_template("jinja_app/override.html").unwrap().render(()).unwrap();
    assert_eq!(out, "PROJECT");
}

#[test]
fn test_earlier_app_wins_and_later_apps_are_searched() {
    let env = env();
    assert_eq!(env.get_template("jinja_app/test.html").unwrap().render(()).unwrap(), "HELLO");
    assert_eq!(
        env.get_template("jinja_app/other.html").unwrap().render(()).unwrap(),
        "other only"
    );
}

#[test]
fn test_missing_template_lists_loaders() {
    let env = env();
    let err = env.loader().resolve("jinja_app/nope.html").unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { ref tried, .. } if tried.len() == 3));
    assert!(env.get_template("jinja_app/nope.html").unwrap_err().is_does_not_exist());
}

#[test]
fn test_extends_across_app_templates() {
    let env = env();
    let out = env
        .get_template("jinja_app/child.html")
        .unwrap()
        .render([("greeting", ContextValue::from("hi"))])
        .unwrap();
    assert_eq!(out, "<main>hi</main>");
}

// ═════════════════════════════════════════════════════════════════════
// 2. Inclusion filter
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_excluded_namespace_is_not_handled() {
    let env = env();
    let loader = JingoLoader::new(&env);
    // The file exists, but `admin/` belongs to the host's own engine.
    assert!(env.loader().find("admin/base.html").is_some());
    assert!(loader.load_template("admin/base.html").unwrap_err().is_does_not_exist());
    assert!(loader.find("admin/base.html").is_none());
    assert_eq!(
        loader.load_template("jinja_app/test.html").unwrap().render(()).unwrap(),
        "HELLO"
    );
}

#[derive(Debug, Default)]
struct CountingLoader {
    calls: AtomicUsize,
}

impl TemplateLoader for CountingLoader {
    fn find(&self, name: &str) -> Option<Origin> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(Origin::Memory {
            name: name.to_string(),
        })
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((
            "counted".to_string(),
            Origin::Memory {
                name: name.to_string(),
            },
        ))
    }

    fn describe(&self) -> String {
        "counting".to_string()
    }
}

struct Shared(Arc<CountingLoader>);

impl TemplateLoader for Shared {
    fn find(&self, name: &str) -> Option<Origin> {
        self.0.find(name)
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        self.0.load(name)
    }

    fn describe(&self) -> String {
        self.0.describe()
    }
}

#[test]
fn test_ineligible_names_never_reach_loaders() {
    let counting = Arc::new(CountingLoader::default());
    let env = Environment::builder()
        .loader(Box::new(Shared(Arc::clone(&counting))))
        .include_pattern(r"\.jinja$")
        .build()
        .unwrap();
    let loader = JingoLoader::new(&env);

    let err = loader.load_template("page.html").unwrap_err();
    assert!(matches!(err, JingoError::TemplateDoesNotExist(ref name) if name == "page.html"));
    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

    let out = loader.load_template("page.jinja").unwrap().render(()).unwrap();
    assert_eq!(out, "counted");
    assert!(counting.calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_include_pattern_from_settings() {
    let mut settings = Settings::default();
    settings.template_dirs = vec![fixtures().join("templates")];
    settings.jingo_include_pattern = Some(r"override".to_string());
    let env = Environment::from_settings(&settings, &apps()).unwrap();
    let loader = JingoLoader::new(&env);

    assert!(loader.load_template("jinja_app/override.html").is_ok());
    assert!(loader.load_template("jinja_app/test.html").is_err());
}

// ═════════════════════════════════════════════════════════════════════
// 3. Context flattening and markup
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_layered_context_is_flattened_later_layers_win() {
    let env = env();
    let mut context = Context::new();
    context.set("name", ContextValue::from("outer"));
    context.set("kept", ContextValue::from("yes"));
    context.push();
    context.set("name", ContextValue::from("inner"));

    let out = env.from_string("{{ name }} {{ kept }}").unwrap().render(context).unwrap();
    assert_eq!(out, "inner yes");
}

#[test]
fn test_json_context() {
    let env = env();
    let out = env
        .from_string("{{ user.name }}:{{ tags|join(',') }}")
        .unwrap()
        .render(serde_json::json!({"user": {"name": "ann"}, "tags": ["a", "b"]}))
        .unwrap();
    assert_eq!(out, "ann:a,b");
}

#[derive(Debug)]
struct Widget {
    attrs: Vec<(String, String)>,
}

impl Html for Widget {
    fn to_html(&self) -> String {
        let attrs: String = self
            .attrs
            .iter()
            .map(|(k, v)| format!(" {k}=\"{v}\""))
            .collect();
        format!("<input{attrs}>")
    }

    fn with_attrs(&self, attrs: &[(String, Option<String>)]) -> Option<Arc<dyn Html>> {
        let mut updated = self.attrs.clone();
        for (key, value) in attrs {
            updated.retain(|(k, _)| k != key);
            if let Some(value) = value {
                updated.push((key.clone(), value.clone()));
            }
        }
        Some(Arc::new(Self { attrs: updated }))
    }
}

#[test]
fn test_host_markup_is_not_escaped() {
    let env = env();
    let widget: Arc<dyn Html> = Arc::new(Widget {
        attrs: vec![("name".into(), "q".into())],
    });
    let out = env
        .from_string("{{ field }}|{{ field|field_attrs(class='big', name=none) }}")
        .unwrap()
        .render([("field", ContextValue::from(widget))])
        .unwrap();
    assert_eq!(out, "<input name=\"q\">|<input class=\"big\">");
}

#[test]
fn test_explicit_escaping_keeps_host_markup() {
    let env = env();
    let widget: Arc<dyn Html> = Arc::new(Widget {
        attrs: vec![("name".into(), "q".into())],
    });
    let out = env
        .from_string("{{ field|e }}|{{ field|escape }}|{{ field|string }}|{{ s|e }}|{{ u|e }}")
        .unwrap()
        .render([
            ("field", ContextValue::from(widget)),
            ("s", ContextValue::SafeString("<b>".into())),
            ("u", ContextValue::from("<i>")),
        ])
        .unwrap();
    assert_eq!(
        out,
        "<input name=\"q\">|<input name=\"q\">|<input name=\"q\">|<b>|&lt;i&gt;"
    );
}

#[test]
fn test_f_and_fe() {
    let env = env();
    assert_eq!(render(&env, r#"{{ "{0} & {1}"|f("a", "b") }}"#), "a &amp; b");
    assert_eq!(render(&env, r#"{{ "<em>{0}</em>"|fe("<b>") }}"#), "<em>&lt;b&gt;</em>");
    assert_eq!(
        render(&env, r#"{{ "<em>{name}</em>"|safe|f(name="<i>") }}"#),
        "<em>&lt;i&gt;</em>"
    );
}

// ═════════════════════════════════════════════════════════════════════
// 4. Registration and helper modules
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_registered_filter_replaces_builtin() {
    let env = env();
    env.register().register_filter("upper", |_, args| {
        Ok(Value::from(format!("[{}]", args[0])))
    });
    assert_eq!(render(&env, "{{ 'a'|upper }}"), "[a]");
}

#[test]
fn test_later_registration_wins() {
    let env = env();
    let register = env.register();
    register.register_filter("a", |_, _| Ok(Value::from("first")));
    register.register_filter("a", |_, _| Ok(Value::from("second")));
    assert_eq!(render(&env, "{{ 1|a }}"), "second");
}

#[test]
fn test_helper_modules_run_once_for_installed_apps() {
    let loaded = Arc::new(AtomicUsize::new(0));
    let skipped = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&loaded);
    let not_installed = Arc::clone(&skipped);
    let env = Environment::builder()
        .dir(fixtures().join("templates"))
        .apps(apps())
        .helpers("jinja_app", move |register: &Register<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            register.register_function("from_app", |_, _| Ok(Value::from("app helper")));
        })
        .helpers("missing_app", move |_: &Register<'_>| {
            not_installed.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    assert!(!env.helpers_loaded());
    assert!(!env.has_global("from_app"));

    env.get_template("jinja_app/test.html").unwrap();
    env.get_template("jinja_app/override.html").unwrap();
    assert_eq!(render(&env, "{{ from_app() }}"), "app helper");

    assert!(env.helpers_loaded());
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
    assert_eq!(skipped.load(Ordering::SeqCst), 0);
}

#[test]
fn test_inclusion_tag_renders_app_template() {
    let env = env();
    env.register().register_inclusion_tag("item", "jinja_app/item.html", |_, args| {
        Ok(HashMap::from([(
            "label".to_string(),
            ContextValue::from(args[0].to_string()),
        )]))
    });
    assert_eq!(render(&env, "<ul>{{ item('<one>') }}</ul>"), "<ul><li>&lt;one&gt;</li></ul>");
}

// ═════════════════════════════════════════════════════════════════════
// 5. Translations
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_translated_placeholder_missing_renders_empty() {
    jingo_core::i18n::catalog::register_translations(
        "xx",
        vec![("Broken %(string)s", "Broken %(x)s")],
    );
    jingo_core::i18n::activate("xx");

    let env = Environment::builder()
        .translations(Arc::new(CatalogTranslations))
        .build()
        .unwrap();
    let out = render(&env, r#"{{ _("Broken %(string)s", string="heart") }}"#);
    jingo_core::i18n::deactivate();

    assert_eq!(out, "Broken ");
}

#[test]
fn test_untranslated_message_interpolates() {
    let env = env();
    assert_eq!(
        render(&env, r#"{{ _("Broken %(string)s", string="heart") }}"#),
        "Broken heart"
    );
}

// ═════════════════════════════════════════════════════════════════════
// 6. Context processors and render_to_string
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_render_to_string_applies_settings_processors() {
    let mut settings = Settings::default();
    settings.static_url = "cdn.example.com".to_string();
    let env = Environment::from_settings(&settings, &AppRegistry::new()).unwrap();
    let request = HttpRequest::builder()
        .path("/cart")
        .meta("CSRF_COOKIE", "abc123")
        .build();

    let template = env.from_string("{{ STATIC_URL }}|{{ csrf() }}|{{ request.method }}").unwrap();
    let out = env.render_to_string(Some(&request), &template, ()).unwrap();
    assert_eq!(
        out,
        "cdn.example.com|<input type='hidden' name='csrfmiddlewaretoken' value='abc123' />|GET"
    );
}

#[test]
fn test_csrf_not_provided_renders_nothing() {
    let env = env();
    let out = env
        .from_string("[{{ csrf() }}]")
        .unwrap()
        .render([("csrf_token", ContextValue::from("NOTPROVIDED"))])
        .unwrap();
    assert_eq!(out, "[]");
}

#[test]
fn test_render_to_string_by_name_without_request() {
    let env = env();
    let out = env.render_to_string(None, "jinja_app/test.html", ()).unwrap();
    assert_eq!(out, "HELLO");
}

// ═════════════════════════════════════════════════════════════════════
// 7. Built-in helpers
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_url_reverses_through_route_table() {
    let mut routes = RouteTable::new();
    routes.add("product", "shop/<int:id>/").unwrap();
    let env = Environment::builder().url_reverser(Arc::new(routes)).build().unwrap();

    assert_eq!(render(&env, "{{ url('product', 7) }}"), "/shop/7/");
    assert_eq!(render(&env, "{{ url('product', id=8) }}"), "/shop/8/");
    assert!(env.from_string("{{ url('nope') }}").unwrap().render(()).is_err());
}

#[test]
fn test_url_without_reverser_fails_to_render() {
    let env = env();
    let err = env.from_string("{{ url('home') }}").unwrap().render(()).unwrap_err();
    assert!(matches!(err, JingoError::RenderError(_)));
}

#[test]
fn test_urlparams_filter() {
    let env = env();
    assert_eq!(
        render(&env, "{{ '/s?page=1'|urlparams('top', page=2, q='a b') }}"),
        "/s?page=2&amp;q=a+b#top"
    );
}

#[test]
fn test_datetime_filter() {
    let env = env();
    assert_eq!(render(&env, "{{ '2009-12-25'|datetime }}"), "December 25, 2009");
    assert_eq!(render(&env, "{{ '2009-12-25'|datetime('%Y') }}"), "2009");
}

#[test]
fn test_nl2br_and_class_selected() {
    let env = env();
    assert_eq!(render(&env, r"{{ 'a\nb'|nl2br }}"), "a<br>b");
    assert_eq!(render(&env, "{{ 1|class_selected(1) }}"), "class=\"selected\"");
}

// ═════════════════════════════════════════════════════════════════════
// 8. Render notifications
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_template_debug_sends_render_signal() {
    let seen: Arc<Mutex<Vec<TemplateRendered>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    TEMPLATE_RENDERED.connect(
        "bridge_integration",
        Arc::new(move |event: &TemplateRendered| {
            if event.name == "jinja_app/test.html" {
                sink.lock().unwrap().push(event.clone());
            }
        }),
    );

    let env = Environment::builder()
        .apps(apps())
        .template_debug(true)
        .build()
        .unwrap();
    env.get_template("jinja_app/test.html")
        .unwrap()
        .render([("b", ContextValue::from(1)), ("a", ContextValue::from(2))])
        .unwrap();
    TEMPLATE_RENDERED.disconnect("bridge_integration");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].context_keys, vec!["a".to_string(), "b".to_string()]);
    assert!(seen[0].origin.as_deref().unwrap().ends_with("test.html"));
}

// ═════════════════════════════════════════════════════════════════════
// 9. Auto-reload
// ═════════════════════════════════════════════════════════════════════

#[test]
fn test_auto_reload_picks_up_changed_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.html");
    fs::write(&path, "v1").unwrap();

    let env = Environment::builder().dir(dir.path()).debug(true).build().unwrap();
    assert!(env.options().auto_reload);
    assert_eq!(env.get_template("live.html").unwrap().render(()).unwrap(), "v1");

    fs::write(&path, "v2").unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
    drop(file);

    assert_eq!(env.get_template("live.html").unwrap().render(()).unwrap(), "v2");
}

fn touch_later(path: &std::path::Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
}

#[test]
fn test_auto_reload_picks_up_changed_parent_template() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.html");
    fs::write(&base, "base-v1:{% block c %}{% endblock %}").unwrap();
    fs::write(
        dir.path().join("child.html"),
        "{% extends 'base.html' %}{% block c %}child{% endblock %}",
    )
    .unwrap();

    let env = Environment::builder().dir(dir.path()).debug(true).build().unwrap();
    assert_eq!(env.get_template("child.html").unwrap().render(()).unwrap(), "base-v1:child");

    fs::write(&base, "base-v2:{% block c %}{% endblock %}").unwrap();
    touch_later(&base);

    assert_eq!(env.get_template("child.html").unwrap().render(()).unwrap(), "base-v2:child");
}

#[test]
fn test_auto_reload_picks_up_changed_include_for_inline_templates() {
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("part.html");
    fs::write(&part, "one").unwrap();

    let env = Environment::builder().dir(dir.path()).debug(true).build().unwrap();
    assert_eq!(render(&env, "{% include 'part.html' %}"), "one");

    fs::write(&part, "two").unwrap();
    touch_later(&part);

    assert_eq!(render(&env, "{% include 'part.html' %}"), "two");
}

#[test]
fn test_without_auto_reload_misses_are_cached() {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::builder().dir(dir.path()).build().unwrap();
    assert!(!env.options().auto_reload);

    assert!(env.get_template("late.html").is_err());
    fs::write(dir.path().join("late.html"), "late").unwrap();
    assert!(env.get_template("late.html").is_err());

    env.loader().clear_cache();
    assert_eq!(env.get_template("late.html").unwrap().render(()).unwrap(), "late");
}
