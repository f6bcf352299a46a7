use crate::{calculator::Precision, model::Weather};

/// Render the daily broadcast text. The template is fixed and single-language.
pub fn render_message(city_name: &str, weather: &Weather, precision: Precision) -> String {
    format!(
        "おはよう U・x・U\n\
         {city_name}のお出かけ時のお天気をお知らせするよ☀️☔️☁️⛄️\n\
         \n\
         最高気温: {max}℃\n\
         最低気温: {min}℃\n\
         降水確率: {pop}%",
        max = precision.format(weather.max_temp()),
        min = precision.format(weather.min_temp()),
        pop = weather.pop(),
    )
}
