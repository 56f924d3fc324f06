//! The tour: custom members, capabilities, proxies and sequences.
use std::sync::Arc;

use member_mapper::*;

trait Titled {
    fn title(&self) -> String;
}

decl_capability! {
    Titled {
        title: String,
    }
}

#[derive(Clone, Debug, Default, Shape)]
#[mapper(capabilities(Titled))]
struct Article {
    id: u64,
    headline: String,
    words: u32,
}

impl Titled for Article {
    fn title(&self) -> String {
        self.headline.clone()
    }
}

#[derive(Clone, Debug, Default, Shape)]
#[mapper(capabilities(Titled))]
struct Podcast {
    id: u64,
    name: String,
    minutes: u32,
}

impl Titled for Podcast {
    fn title(&self) -> String {
        self.name.clone()
    }
}

#[derive(Clone, Debug, Default, Shape)]
struct ArticleSummary {
    id: u64,
    headline: String,
    // Copied from a `u32`, widened on the way.
    words: u64,
    reading_time: String,
}

#[derive(Clone, Debug, Default, Shape)]
struct Card {
    title: String,
    caption: String,
}

/// What a lazy-loading layer would generate in front of an [Article].
mod lazy {
    use super::Article;
    use member_mapper::Shape;

    #[derive(Clone, Debug, Shape)]
    pub struct ArticleProxy {
        #[mapper(proxy_of)]
        pub target: Article,
    }
}

struct ContentProfile;

impl Profile for ContentProfile {
    fn configure(&self, registry: &RuleRegistry) -> Result<()> {
        registry
            .register::<Article, ArticleSummary>()?
            .map_member("reading_time", |a: &Article| format!("{} min", a.words / 200 + 1))?;

        registry
            .register::<dyn Titled, Card>()?
            .map_member("caption", |t| t.title().to_uppercase())?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let registry = Arc::new(RuleRegistry::new());
    registry.apply(&ContentProfile)?;

    let config = MapperConfig::new().with_proxy_strategy(NamespaceProxies::new(["lazy"]));
    let mapper = Mapper::with_config(registry, config);
    println!("compiled {} mappings", mapper.compile_all()?);

    let article = Article {
        id: 7,
        headline: "Shapes all the way down".into(),
        words: 1200,
    };
    let summary: ArticleSummary = mapper.map(&article)?;
    println!("{:?}", summary);

    // Neither type has a rule of its own for `Card`; both go through `dyn Titled`.
    let podcast = Podcast {
        id: 3,
        name: "Borrowed time".into(),
        minutes: 42,
    };
    let items = vec![&article as &dyn Mappable, &podcast as &dyn Mappable];
    for card in mapper.map_all_dyn::<Card>(&items) {
        println!("{:?}", card?);
    }

    let proxy = lazy::ArticleProxy { target: article };
    let card: Option<ArticleSummary> = mapper.map_dyn(Some(&proxy))?;
    println!("through a proxy: {:?}", card);

    let missing: Option<Card> = mapper.map_dyn(None)?;
    println!("nothing in, nothing out: {:?}", missing);
    Ok(())
}
